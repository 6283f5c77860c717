use super::{flags_to_config, text_value, FlagMove};
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

const METRICS_FLAGS: [FlagMove; 2] = [
    FlagMove {
        flag: "metrics-addr",
        path: &["service", "telemetry", "metrics", "address"],
        convert: text_value,
    },
    FlagMove {
        flag: "metrics-level",
        path: &["service", "telemetry", "metrics", "level"],
        convert: text_value,
    },
];

/// Internal metrics flags were replaced by `service.telemetry.metrics`
pub struct MetricsFlagsToTelemetry;

#[async_trait]
impl Transform for MetricsFlagsToTelemetry {
    fn name(&self) -> &'static str {
        "metrics-flags-to-telemetry"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let notes = flags_to_config(&mut collector, &METRICS_FLAGS)?;
        ctx.record_changes(notes);
        Ok(collector)
    }
}
