#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::crd::{CollectorSpec, ManagementState, UpgradeStrategy};
use crate::server::create_metrics;
use crate::upgrade::cluster::MockCollectorStore;
use crate::upgrade::versions::collector_registry;

const JAEGER_REMOTE_SAMPLING: &str = r#"
receivers:
  jaeger:
    protocols:
      grpc: {}
    remote_sampling:
      strategy_file: /etc/strategy.json
"#;

const LEGACY_EXPORTER: &str = r#"
exporters:
  logging:
    loglevel: debug
"#;

fn instance(name: &str, version: &str, config: &str) -> OpenTelemetryCollector {
    let mut collector = OpenTelemetryCollector::new(name, CollectorSpec::default());
    collector.metadata.namespace = Some("observability".to_string());
    collector.metadata.resource_version = Some("7".to_string());
    collector.spec.config = config.to_string();
    if !version.is_empty() {
        collector.set_status_version(version);
    }
    collector
}

#[tokio::test]
async fn test_fleet_isolates_failing_instance() {
    let registry = collector_registry().unwrap();
    let (ctx, events, _) = UpgradeContext::new_mock("0.104.0");
    let store = MockCollectorStore::new(vec![
        instance("first", "0.60.0", LEGACY_EXPORTER),
        instance("second", "0.60.0", JAEGER_REMOTE_SAMPLING),
        instance("third", "0.60.0", LEGACY_EXPORTER),
    ]);

    let report = upgrade_fleet(&registry, &ctx, &store).await.unwrap();

    assert_eq!(report.upgraded, vec!["observability/first", "observability/third"]);
    assert_eq!(report.failed, vec!["observability/second"]);

    let persisted = store.persisted();
    let names: Vec<_> = persisted.iter().map(|c| c.name_any()).collect();
    assert_eq!(names, vec!["first", "third"]);
    for collector in &persisted {
        assert_eq!(collector.status_version(), "0.104.0");
        assert!(collector.spec.config.contains("verbosity: detailed"));
    }

    let warnings: Vec<_> = events.events().into_iter().filter(|e| e.warning).collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].object, "second");
    assert_eq!(warnings[0].reason, "Error");
    assert!(warnings[0].note.contains("remote_sampling"));
}

#[tokio::test]
async fn test_fleet_aborts_when_listing_fails() {
    let registry = collector_registry().unwrap();
    let (ctx, _, _) = UpgradeContext::new_mock("0.104.0");
    let store = MockCollectorStore::new(vec![instance("first", "0.60.0", LEGACY_EXPORTER)]);
    store.fail_list();

    let err = upgrade_fleet(&registry, &ctx, &store).await.unwrap_err();

    assert!(matches!(err, UpgradeError::Kube(_)));
    assert!(store.persisted().is_empty());
}

#[tokio::test]
async fn test_fleet_continues_after_persist_failure() {
    let registry = collector_registry().unwrap();
    let (ctx, events, _) = UpgradeContext::new_mock("0.104.0");
    let store = MockCollectorStore::new(vec![
        instance("conflicted", "0.60.0", LEGACY_EXPORTER),
        instance("fine", "0.60.0", LEGACY_EXPORTER),
    ]);
    store.fail_persist("conflicted");

    let report = upgrade_fleet(&registry, &ctx, &store).await.unwrap();

    assert_eq!(report.failed, vec!["observability/conflicted"]);
    assert_eq!(report.upgraded, vec!["observability/fine"]);
    assert_eq!(events.events().iter().filter(|e| e.warning).count(), 1);
    // Nothing was written for the conflicted instance, so none of its changes are announced
    assert!(events
        .events()
        .iter()
        .all(|e| e.warning || e.object != "conflicted"));
}

#[tokio::test]
async fn test_changes_are_announced_after_persisting() {
    let registry = collector_registry().unwrap();
    let (ctx, events, _) = UpgradeContext::new_mock("0.104.0");
    let store = MockCollectorStore::new(Vec::new());

    upgrade_instance(&registry, &ctx, &store, &instance("old", "0.85.0", LEGACY_EXPORTER))
        .await
        .unwrap();

    let recorded = events.events();
    assert!(recorded.len() >= 2);
    assert!(recorded.iter().all(|e| !e.warning && e.reason == "Upgrade"));
    assert!(recorded[0].note.contains("loglevel"));
    assert_eq!(
        recorded.last().unwrap().note,
        "upgraded instance from version 0.85.0 to 0.104.0"
    );
}

#[tokio::test]
async fn test_failed_chain_announces_no_changes() {
    let registry = collector_registry().unwrap();
    let (ctx, events, _) = UpgradeContext::new_mock("0.104.0");
    let store = MockCollectorStore::new(Vec::new());
    // The v0.38.0 flag move succeeds before v0.61.0 refuses the instance
    let mut rejected = instance("rejected", "0.37.0", JAEGER_REMOTE_SAMPLING);
    rejected
        .spec
        .args
        .insert("--log-level".to_string(), "debug".to_string());

    let err = upgrade_instance(&registry, &ctx, &store, &rejected)
        .await
        .unwrap_err();

    assert!(matches!(err, UpgradeError::Transform { .. }));
    assert!(store.persisted().is_empty());
    let recorded = events.events();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].warning);
}

#[tokio::test]
async fn test_fleet_report_counts_every_outcome() {
    let registry = collector_registry().unwrap();
    let (ctx, _, _) = UpgradeContext::new_mock("0.104.0");

    let mut unmanaged = instance("unmanaged", "0.60.0", LEGACY_EXPORTER);
    unmanaged.spec.management_state = ManagementState::Unmanaged;
    let mut pinned = instance("pinned", "0.60.0", LEGACY_EXPORTER);
    pinned.spec.upgrade_strategy = UpgradeStrategy::None;
    let current = instance("current", "0.104.0", LEGACY_EXPORTER);
    let fresh = instance("fresh", "", LEGACY_EXPORTER);

    let store = MockCollectorStore::new(vec![unmanaged, pinned, current, fresh]);

    let report = upgrade_fleet(&registry, &ctx, &store).await.unwrap();

    assert_eq!(report.skipped, vec!["observability/unmanaged", "observability/pinned"]);
    assert_eq!(report.unchanged, vec!["observability/current"]);
    assert_eq!(report.upgraded, vec!["observability/fresh"]);
    assert!(report.failed.is_empty());
    assert_eq!(report.total(), 4);
}

#[tokio::test]
async fn test_new_instance_adopts_target_without_migrating() {
    let registry = collector_registry().unwrap();
    let (ctx, events, _) = UpgradeContext::new_mock("0.104.0");
    let store = MockCollectorStore::new(Vec::new());
    let fresh = instance("fresh", "", LEGACY_EXPORTER);

    let outcome = upgrade_instance(&registry, &ctx, &store, &fresh).await.unwrap();

    assert_eq!(
        outcome,
        InstanceOutcome::Upgraded {
            version: "0.104.0".to_string()
        }
    );
    let persisted = store.persisted();
    assert_eq!(persisted.len(), 1);
    // Config is written by users against the running version, so it is left as is
    assert_eq!(persisted[0].spec.config, LEGACY_EXPORTER);
    assert_eq!(events.notes(), vec!["instance adopted version 0.104.0"]);
}

#[tokio::test]
async fn test_current_instance_is_not_written() {
    let registry = collector_registry().unwrap();
    let (ctx, events, _) = UpgradeContext::new_mock("0.104.0");
    let store = MockCollectorStore::new(Vec::new());

    let outcome = upgrade_instance(&registry, &ctx, &store, &instance("current", "0.104.0", ""))
        .await
        .unwrap();

    assert_eq!(outcome, InstanceOutcome::Unchanged);
    assert!(store.persisted().is_empty());
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_unparseable_version_is_reported() {
    let registry = collector_registry().unwrap();
    let (ctx, events, _) = UpgradeContext::new_mock("0.104.0");
    let store = MockCollectorStore::new(Vec::new());

    let err = upgrade_instance(
        &registry,
        &ctx,
        &store,
        &instance("broken", "not-a-version", LEGACY_EXPORTER),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, UpgradeError::VersionParse { .. }));
    assert!(store.persisted().is_empty());
    let recorded = events.events();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].warning);
}

#[tokio::test]
async fn test_outcomes_are_counted_in_metrics() {
    let registry = collector_registry().unwrap();
    let (mut ctx, _, _) = UpgradeContext::new_mock("0.104.0");
    let metrics = create_metrics().unwrap();
    ctx.metrics = Some(metrics.clone());
    let store = MockCollectorStore::new(vec![
        instance("old", "0.85.0", LEGACY_EXPORTER),
        instance("current", "0.104.0", ""),
    ]);

    upgrade_fleet(&registry, &ctx, &store).await.unwrap();

    let text = metrics.encode().unwrap();
    assert!(text.contains(r#"otelop_instance_upgrades_total{result="upgraded"} 1"#));
    assert!(text.contains(r#"otelop_instance_upgrades_total{result="unchanged"} 1"#));
    assert!(text.contains(r#"otelop_upgrade_steps_total{version="0.86.0"} 1"#));
    assert!(text.contains("otelop_fleet_upgrade_duration_seconds_count 1"));
}
