use super::{components_mut, edit_config};
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

/// The opencensus exporter no longer accepts `reconnection_delay`
pub struct DropOpencensusReconnectionDelay;

#[async_trait]
impl Transform for DropOpencensusReconnectionDelay {
    fn name(&self) -> &'static str {
        "drop-opencensus-reconnection-delay"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let notes = edit_config(&mut collector, |tree| {
            let mut notes = Vec::new();
            for (id, exporter) in components_mut(tree, "exporters", "opencensus") {
                if exporter.remove("reconnection_delay").is_some() {
                    notes.push(format!(
                        "removed property 'reconnection_delay' from exporter '{id}'"
                    ));
                }
            }
            Ok(notes)
        })?;

        ctx.record_changes(notes);
        Ok(collector)
    }
}
