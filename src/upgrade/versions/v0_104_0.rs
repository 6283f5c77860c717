use super::take_flag;
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

/// Gates that became permanently enabled and are rejected when passed again
const FINALIZED_GATES: [&str; 4] = [
    "service.connectors",
    "telemetry.useOtelForInternalMetrics",
    "exporter.otlphttp.ignoreDefaultHTTPTimeout",
    "confighttp.framedSnappy",
];

/// Finalized feature gates are no longer accepted by `--feature-gates`
pub struct DropFinalizedFeatureGates;

#[async_trait]
impl Transform for DropFinalizedFeatureGates {
    fn name(&self) -> &'static str {
        "drop-finalized-feature-gates"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let Some((key, value)) = take_flag(&mut collector.spec.args, "feature-gates") else {
            return Ok(collector);
        };

        let (finalized, kept): (Vec<&str>, Vec<&str>) = value
            .split(',')
            .map(str::trim)
            .filter(|gate| !gate.is_empty())
            .partition(|gate| FINALIZED_GATES.contains(&gate.trim_start_matches(['+', '-'])));

        if finalized.is_empty() {
            collector.spec.args.insert(key, value.clone());
            return Ok(collector);
        }

        let mut notes: Vec<String> = finalized
            .iter()
            .map(|gate| format!("removed finalized feature gate '{gate}' from '{key}'"))
            .collect();
        if kept.is_empty() {
            notes.push(format!("removed flag '{key}', no feature gates left"));
        } else {
            collector.spec.args.insert(key, kept.join(","));
        }

        ctx.record_changes(notes);
        Ok(collector)
    }
}
