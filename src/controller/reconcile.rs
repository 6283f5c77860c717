use crate::crd::OpenTelemetryCollector;
use crate::server::SharedMetrics;
use crate::upgrade::{upgrade_instance, CollectorStore, InstanceOutcome, UpgradeContext, UpgradeError, VersionRegistry};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Delay before a retryable failure is reconciled again
pub const RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("OpenTelemetryCollector missing namespace")]
    MissingNamespace,

    #[error(transparent)]
    Upgrade(#[from] UpgradeError),
}

impl ReconcileError {
    /// Whether retrying without a change to the object can succeed
    ///
    /// Rejected upgrades and unreadable configs or versions need a user edit, and that
    /// edit triggers a new reconcile anyway.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Upgrade(UpgradeError::Kube(e)) => {
                matches!(
                    e,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            ReconcileError::Upgrade(_) | ReconcileError::MissingNamespace => false,
        }
    }
}

/// State shared by every reconcile
pub struct Context {
    pub registry: Arc<VersionRegistry>,
    pub upgrade: UpgradeContext,
    pub store: Arc<dyn CollectorStore>,
    pub metrics: Option<SharedMetrics>,
}

impl Context {
    pub fn new(
        registry: Arc<VersionRegistry>,
        upgrade: UpgradeContext,
        store: Arc<dyn CollectorStore>,
    ) -> Self {
        let metrics = upgrade.metrics.clone();
        Context {
            registry,
            upgrade,
            store,
            metrics,
        }
    }
}

/// Bring one collector to the running version
///
/// The controller is driven by watch events only: a collector is looked at again when
/// it changes, or after [`RETRY_INTERVAL`] when a retryable error occurred.
pub async fn reconcile(
    collector: Arc<OpenTelemetryCollector>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let namespace = collector
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;
    let name = collector.name_any();

    debug!(collector = %name, %namespace, "Reconciling OpenTelemetryCollector");

    let result =
        upgrade_instance(&ctx.registry, &ctx.upgrade, ctx.store.as_ref(), &collector).await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.record_reconciliation(result.is_ok());
    }

    match result? {
        InstanceOutcome::Upgraded { version } => {
            info!(collector = %name, %namespace, %version, "Collector upgraded");
        }
        InstanceOutcome::Unchanged => {
            debug!(collector = %name, %namespace, "Collector already current");
        }
        InstanceOutcome::Skipped => {
            debug!(collector = %name, %namespace, "Collector opted out of upgrades");
        }
    }
    Ok(Action::await_change())
}

/// Requeue retryable failures, wait for an edit otherwise
pub fn error_policy(
    collector: Arc<OpenTelemetryCollector>,
    error: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    if error.is_retryable() {
        warn!(collector = %collector.name_any(), error = %error, "Reconcile failed, will retry");
        Action::requeue(RETRY_INTERVAL)
    } else {
        warn!(
            collector = %collector.name_any(),
            error = %error,
            "Reconcile failed, waiting for the collector to change"
        );
        Action::await_change()
    }
}

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod tests;
