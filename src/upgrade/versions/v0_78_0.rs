use crate::crd::{AutoscalerSpec, OpenTelemetryCollector};
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

/// Replica bounds moved from the top of the spec into `spec.autoscaler`
pub struct LegacyReplicasToAutoscaler;

#[async_trait]
impl Transform for LegacyReplicasToAutoscaler {
    fn name(&self) -> &'static str {
        "legacy-replicas-to-autoscaler"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let mut notes = Vec::new();
        let spec = &mut collector.spec;

        if let Some(max) = spec.max_replicas.take() {
            let autoscaler = spec.autoscaler.get_or_insert_with(AutoscalerSpec::default);
            if autoscaler.max_replicas.is_none() {
                autoscaler.max_replicas = Some(max);
                notes.push("moved 'maxReplicas' to 'autoscaler.maxReplicas'".to_string());
            } else {
                notes.push("removed 'maxReplicas', 'autoscaler.maxReplicas' is already set".to_string());
            }
        }
        if let Some(min) = spec.min_replicas.take() {
            let autoscaler = spec.autoscaler.get_or_insert_with(AutoscalerSpec::default);
            if autoscaler.min_replicas.is_none() {
                autoscaler.min_replicas = Some(min);
                notes.push("moved 'minReplicas' to 'autoscaler.minReplicas'".to_string());
            } else {
                notes.push("removed 'minReplicas', 'autoscaler.minReplicas' is already set".to_string());
            }
        }

        ctx.record_changes(notes);
        Ok(collector)
    }
}
