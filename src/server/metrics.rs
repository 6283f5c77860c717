//! Prometheus metrics for the operator
//!
//! Metrics live in a private registry (not the process-global default) so tests can
//! build as many as they need.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics shared between the upgrade engine, the controller and the `/metrics` handler
pub type SharedMetrics = Arc<OperatorMetrics>;

pub struct OperatorMetrics {
    registry: Registry,
    upgrade_steps: IntCounterVec,
    instance_upgrades: IntCounterVec,
    fleet_upgrade_duration: Histogram,
    reconciliations: IntCounterVec,
}

impl OperatorMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let upgrade_steps = IntCounterVec::new(
            Opts::new(
                "otelop_upgrade_steps_total",
                "Upgrade routines applied to collector instances",
            ),
            &["version"],
        )?;
        let instance_upgrades = IntCounterVec::new(
            Opts::new(
                "otelop_instance_upgrades_total",
                "Collector instance upgrade passes by result",
            ),
            &["result"],
        )?;
        let fleet_upgrade_duration = Histogram::with_opts(
            HistogramOpts::new(
                "otelop_fleet_upgrade_duration_seconds",
                "Time taken to upgrade every managed collector",
            )
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        )?;
        let reconciliations = IntCounterVec::new(
            Opts::new(
                "otelop_reconciliations_total",
                "Collector reconciliations by result",
            ),
            &["result"],
        )?;

        registry.register(Box::new(upgrade_steps.clone()))?;
        registry.register(Box::new(instance_upgrades.clone()))?;
        registry.register(Box::new(fleet_upgrade_duration.clone()))?;
        registry.register(Box::new(reconciliations.clone()))?;

        Ok(Self {
            registry,
            upgrade_steps,
            instance_upgrades,
            fleet_upgrade_duration,
            reconciliations,
        })
    }

    /// One upgrade routine applied
    pub fn record_upgrade_step(&self, version: &str) {
        self.upgrade_steps.with_label_values(&[version]).inc();
    }

    /// One instance went through an upgrade pass (`upgraded`, `unchanged`, `skipped`, `failed`)
    pub fn record_instance_upgrade(&self, result: &str) {
        self.instance_upgrades.with_label_values(&[result]).inc();
    }

    pub fn observe_fleet_upgrade(&self, duration_secs: f64) {
        self.fleet_upgrade_duration.observe(duration_secs);
    }

    pub fn record_reconciliation(&self, success: bool) {
        let result = if success { "success" } else { "error" };
        self.reconciliations.with_label_values(&[result]).inc();
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Create the operator metrics
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(OperatorMetrics::new()?))
}
