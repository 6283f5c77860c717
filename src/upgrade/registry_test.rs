#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::crd::{CollectorSpec, ManagementState};

/// Appends its label to the `trail` arg so tests can see the order steps ran in
struct Trail(&'static str);

#[async_trait]
impl Transform for Trail {
    fn name(&self) -> &'static str {
        self.0
    }

    async fn apply(
        &self,
        _ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let trail = collector.spec.args.entry("trail".to_string()).or_default();
        if !trail.is_empty() {
            trail.push(',');
        }
        trail.push_str(self.0);
        Ok(collector)
    }
}

struct Reject;

#[async_trait]
impl Transform for Reject {
    fn name(&self) -> &'static str {
        "reject"
    }

    async fn apply(
        &self,
        _ctx: &UpgradeContext,
        _collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        Err(StepError::Rejected("unsupported setting".to_string()))
    }
}

/// Reports a fixed change without touching the instance
struct Noting(&'static str);

#[async_trait]
impl Transform for Noting {
    fn name(&self) -> &'static str {
        "noting"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        ctx.record_change(self.0);
        Ok(collector)
    }
}

fn registry() -> VersionRegistry {
    // Registered out of order on purpose
    VersionRegistry::builder()
        .register("0.3.0", Trail("three"))
        .unwrap()
        .register("0.1.0", Trail("one"))
        .unwrap()
        .register("0.2.0", Trail("two"))
        .unwrap()
        .build()
}

fn collector_at(version: &str) -> OpenTelemetryCollector {
    let mut collector = OpenTelemetryCollector::new("otel", CollectorSpec::default());
    collector.metadata.namespace = Some("observability".to_string());
    collector.spec.config = "receivers:\n  otlp: {}\n".to_string();
    if !version.is_empty() {
        collector.set_status_version(version);
    }
    collector
}

fn trail(collector: &OpenTelemetryCollector) -> Option<&str> {
    collector.spec.args.get("trail").map(String::as_str)
}

#[test]
fn test_build_sorts_by_version() {
    let registry = registry();
    let versions: Vec<String> = registry.versions().map(ToString::to_string).collect();

    assert_eq!(versions, vec!["0.1.0", "0.2.0", "0.3.0"]);
    assert_eq!(registry.latest().unwrap().to_string(), "0.3.0");
    assert_eq!(registry.len(), 3);
}

#[test]
fn test_duplicate_version_is_rejected() {
    let result = VersionRegistry::builder()
        .register("0.1.0", Trail("a"))
        .unwrap()
        .register("0.1.0", Trail("b"));

    assert!(matches!(result, Err(RegistryError::Duplicate(v)) if v == Version::new(0, 1, 0)));
}

#[test]
fn test_invalid_version_literal_is_rejected() {
    let result = VersionRegistry::builder().register("0.1", Trail("a"));
    assert!(matches!(result, Err(RegistryError::InvalidVersion { .. })));
}

#[test]
fn test_pending_is_half_open_interval() {
    let registry = registry();
    let pending: Vec<String> = registry
        .pending(&Version::new(0, 1, 0), &Version::new(0, 3, 0))
        .map(|e| e.version.to_string())
        .collect();

    assert_eq!(pending, vec!["0.2.0", "0.3.0"]);
    assert_eq!(
        registry
            .pending(&Version::new(0, 3, 0), &Version::new(0, 1, 0))
            .count(),
        0
    );
}

#[tokio::test]
async fn test_steps_run_in_ascending_order() {
    let (ctx, _, _) = UpgradeContext::new_mock("0.3.0");

    let upgraded = registry().upgrade(&ctx, &collector_at("0.0.1")).await.unwrap();

    assert_eq!(trail(&upgraded), Some("one,two,three"));
    assert_eq!(upgraded.status_version(), "0.3.0");
}

#[tokio::test]
async fn test_recorded_version_may_carry_a_v_prefix() {
    let (ctx, _, _) = UpgradeContext::new_mock("0.3.0");

    let upgraded = registry().upgrade(&ctx, &collector_at("v0.1.0")).await.unwrap();

    assert_eq!(trail(&upgraded), Some("two,three"));
    assert_eq!(upgraded.status_version(), "0.3.0");
}

#[tokio::test]
async fn test_changes_are_collected_per_instance() {
    let registry = VersionRegistry::builder()
        .register("0.1.0", Noting("first change"))
        .unwrap()
        .register("0.2.0", Noting("second change"))
        .unwrap()
        .build();
    let (ctx, events, _) = UpgradeContext::new_mock("0.2.0");

    let migration = registry.migrate(&ctx, &collector_at("0.0.1")).await.unwrap();
    let other = registry.migrate(&ctx, &collector_at("0.1.0")).await.unwrap();

    assert_eq!(migration.changes, vec!["first change", "second change"]);
    assert_eq!(other.changes, vec!["second change"]);
    assert!(ctx.changes().is_empty());
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_only_steps_up_to_target_run() {
    let (ctx, _, _) = UpgradeContext::new_mock("0.2.5");

    let upgraded = registry().upgrade(&ctx, &collector_at("0.1.0")).await.unwrap();

    assert_eq!(trail(&upgraded), Some("two"));
    assert_eq!(upgraded.status_version(), "0.2.5");
}

#[tokio::test]
async fn test_version_advances_even_without_steps() {
    let (ctx, _, _) = UpgradeContext::new_mock("0.9.0");

    let upgraded = registry().upgrade(&ctx, &collector_at("0.3.0")).await.unwrap();

    assert!(trail(&upgraded).is_none());
    assert_eq!(upgraded.status_version(), "0.9.0");
}

#[tokio::test]
async fn test_no_op_at_target_version() {
    let (ctx, _, _) = UpgradeContext::new_mock("0.3.0");
    let collector = collector_at("0.3.0");

    let upgraded = registry().upgrade(&ctx, &collector).await.unwrap();

    assert_eq!(upgraded, collector);
}

#[tokio::test]
async fn test_newer_instance_passes_through() {
    let (ctx, _, _) = UpgradeContext::new_mock("0.2.0");
    let collector = collector_at("1.0.0");

    let upgraded = registry().upgrade(&ctx, &collector).await.unwrap();

    assert_eq!(upgraded, collector);
    assert_eq!(upgraded.status_version(), "1.0.0");
}

#[tokio::test]
async fn test_unmanaged_instance_is_never_touched() {
    let (ctx, _, _) = UpgradeContext::new_mock("0.3.0");
    let mut collector = collector_at("0.0.1");
    collector.spec.management_state = ManagementState::Unmanaged;

    let upgraded = registry().upgrade(&ctx, &collector).await.unwrap();

    assert_eq!(upgraded, collector);
}

#[tokio::test]
async fn test_new_instance_is_returned_unchanged() {
    let (ctx, _, _) = UpgradeContext::new_mock("0.3.0");
    let collector = collector_at("");

    let upgraded = registry().upgrade(&ctx, &collector).await.unwrap();

    assert_eq!(upgraded, collector);
    assert_eq!(upgraded.status_version(), "");
}

#[tokio::test]
async fn test_unparseable_version_is_fatal() {
    let (ctx, _, _) = UpgradeContext::new_mock("0.3.0");
    let collector = collector_at("not-a-version");

    let err = registry().upgrade(&ctx, &collector).await.unwrap_err();

    match err {
        UpgradeError::VersionParse { version, .. } => assert_eq!(version, "not-a-version"),
        other => panic!("expected VersionParse, got {other:?}"),
    }
    // Input is borrowed, so config and args stay as they were
    assert!(collector.spec.args.is_empty());
    assert_eq!(collector.spec.config, "receivers:\n  otlp: {}\n");
}

#[tokio::test]
async fn test_failing_step_stops_the_chain() {
    let registry = VersionRegistry::builder()
        .register("0.1.0", Trail("one"))
        .unwrap()
        .register("0.2.0", Reject)
        .unwrap()
        .register("0.3.0", Trail("three"))
        .unwrap()
        .build();
    let (ctx, _, _) = UpgradeContext::new_mock("0.3.0");

    let err = registry.upgrade(&ctx, &collector_at("0.0.1")).await.unwrap_err();

    match err {
        UpgradeError::Transform { version, reason } => {
            assert_eq!(version, Version::new(0, 2, 0));
            assert_eq!(reason, "unsupported setting");
        }
        other => panic!("expected Transform error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_upgrade_is_idempotent() {
    let (ctx, _, _) = UpgradeContext::new_mock("0.3.0");
    let registry = registry();

    let once = registry.upgrade(&ctx, &collector_at("0.0.1")).await.unwrap();
    let twice = registry.upgrade(&ctx, &once).await.unwrap();

    assert_eq!(once, twice);
}
