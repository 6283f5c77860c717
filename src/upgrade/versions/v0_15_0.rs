use super::take_flag;
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

const REMOVED_FLAGS: [&str; 2] = ["new-metrics", "legacy-metrics"];

/// The collector dropped the flags that toggled the old metrics pipeline
pub struct DropLegacyMetricsFlags;

#[async_trait]
impl Transform for DropLegacyMetricsFlags {
    fn name(&self) -> &'static str {
        "drop-legacy-metrics-flags"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let notes: Vec<String> = REMOVED_FLAGS
            .iter()
            .filter_map(|flag| take_flag(&mut collector.spec.args, flag))
            .map(|(key, _)| format!("removed flag '{key}'"))
            .collect();

        ctx.record_changes(notes);
        Ok(collector)
    }
}
