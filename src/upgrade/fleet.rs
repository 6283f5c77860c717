//! Upgrading and persisting instances
//!
//! `upgrade_instance` is the caller of the driver for one stored instance: it honours
//! the opt-outs, adopts the running version for new instances, persists the result and
//! reports it. `upgrade_fleet` runs it over every managed instance, one at a time.

use super::cluster::CollectorStore;
use super::context::UpgradeContext;
use super::registry::{Migration, VersionRegistry};
use super::UpgradeError;
use crate::crd::OpenTelemetryCollector;
use kube::ResourceExt;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What happened to one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceOutcome {
    /// Opted out through `managementState` or `upgradeStrategy`
    Skipped,
    /// Already current, nothing written
    Unchanged,
    /// Written back at `version`
    Upgraded { version: String },
}

impl InstanceOutcome {
    /// Label used for the instance upgrade metric
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceOutcome::Skipped => "skipped",
            InstanceOutcome::Unchanged => "unchanged",
            InstanceOutcome::Upgraded { .. } => "upgraded",
        }
    }
}

/// Summary of a fleet scan, as `namespace/name` lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetReport {
    pub upgraded: Vec<String>,
    pub unchanged: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl FleetReport {
    pub fn total(&self) -> usize {
        self.upgraded.len() + self.unchanged.len() + self.skipped.len() + self.failed.len()
    }
}

fn qualified_name(collector: &OpenTelemetryCollector) -> String {
    format!(
        "{}/{}",
        collector.namespace().unwrap_or_else(|| "default".to_string()),
        collector.name_any()
    )
}

/// Upgrade one stored instance and write it back
///
/// The changes made by each routine are announced as Normal events once the instance
/// has been persisted, followed by a summary. Failures are announced with a single
/// Warning event on the instance before being returned.
pub async fn upgrade_instance(
    registry: &VersionRegistry,
    ctx: &UpgradeContext,
    store: &dyn CollectorStore,
    original: &OpenTelemetryCollector,
) -> Result<InstanceOutcome, UpgradeError> {
    let outcome = try_upgrade_instance(registry, ctx, store, original).await;

    if let Some(ref metrics) = ctx.metrics {
        let result = outcome.as_ref().map_or("failed", InstanceOutcome::as_str);
        metrics.record_instance_upgrade(result);
    }
    if let Err(ref e) = outcome {
        ctx.record_failure(original, format!("failed to upgrade instance: {e}"))
            .await;
    }
    outcome
}

async fn try_upgrade_instance(
    registry: &VersionRegistry,
    ctx: &UpgradeContext,
    store: &dyn CollectorStore,
    original: &OpenTelemetryCollector,
) -> Result<InstanceOutcome, UpgradeError> {
    let name = qualified_name(original);

    if original.skips_upgrades() {
        debug!(collector = %name, "Instance opted out of upgrades");
        return Ok(InstanceOutcome::Skipped);
    }

    let Migration {
        collector: mut upgraded,
        changes,
    } = registry.migrate(ctx, original).await?;
    if upgraded.status_version().is_empty() {
        // New instance: nothing to migrate, start tracking at the running version
        upgraded.set_status_version(ctx.target_version.to_string());
    }

    if upgraded == *original {
        debug!(collector = %name, version = original.status_version(), "Instance is current");
        return Ok(InstanceOutcome::Unchanged);
    }

    store.persist(original, &upgraded).await?;

    let version = upgraded.status_version().to_string();
    let note = match original.status_version() {
        "" => format!("instance adopted version {version}"),
        previous => format!("upgraded instance from version {previous} to {version}"),
    };
    info!(collector = %name, %version, "Persisted upgraded instance");
    ctx.record_upgrades(&upgraded, changes).await;
    ctx.record_upgrade(&upgraded, note).await;

    Ok(InstanceOutcome::Upgraded { version })
}

/// Upgrade every managed instance
///
/// Instances are processed sequentially. A failing instance is reported and skipped;
/// only a failure to list the fleet aborts the scan.
pub async fn upgrade_fleet(
    registry: &VersionRegistry,
    ctx: &UpgradeContext,
    store: &dyn CollectorStore,
) -> Result<FleetReport, UpgradeError> {
    let started = Instant::now();
    let instances = store.list_managed().await?;
    info!(
        instances = instances.len(),
        target = %ctx.target_version,
        "Starting fleet upgrade"
    );

    let mut report = FleetReport::default();
    for instance in &instances {
        let name = qualified_name(instance);
        match upgrade_instance(registry, ctx, store, instance).await {
            Ok(InstanceOutcome::Upgraded { .. }) => report.upgraded.push(name),
            Ok(InstanceOutcome::Unchanged) => report.unchanged.push(name),
            Ok(InstanceOutcome::Skipped) => report.skipped.push(name),
            Err(e) => {
                warn!(collector = %name, error = %e, "Instance upgrade failed, continuing with the fleet");
                report.failed.push(name);
            }
        }
    }

    if let Some(ref metrics) = ctx.metrics {
        metrics.observe_fleet_upgrade(started.elapsed().as_secs_f64());
    }
    info!(
        upgraded = report.upgraded.len(),
        unchanged = report.unchanged.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Fleet upgrade finished"
    );
    Ok(report)
}

#[cfg(test)]
#[path = "fleet_test.rs"]
mod tests;
