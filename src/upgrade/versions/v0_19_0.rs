use super::{component_type, edit_config};
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::config_tree::ConfigNode;
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

const QUEUED_RETRY: &str = "queued_retry";

/// The `queued_retry` processor was replaced by exporter-level queues
pub struct RemoveQueuedRetry;

#[async_trait]
impl Transform for RemoveQueuedRetry {
    fn name(&self) -> &'static str {
        "remove-queued-retry"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let notes = edit_config(&mut collector, |tree| {
            let mut notes = Vec::new();

            if let Some(processors) = tree.get_mut("processors").and_then(ConfigNode::as_mapping_mut) {
                let removed: Vec<String> = processors
                    .keys()
                    .filter(|id| component_type(id) == QUEUED_RETRY)
                    .cloned()
                    .collect();
                for id in removed {
                    processors.remove(&id);
                    notes.push(format!("removed processor '{id}'"));
                }
            }

            let Some(pipelines) = tree
                .get_path_mut(&["service", "pipelines"])
                .and_then(ConfigNode::as_mapping_mut)
            else {
                return Ok(notes);
            };
            for (pipeline, definition) in pipelines.iter_mut() {
                let Some(refs) = definition
                    .get_mut("processors")
                    .and_then(ConfigNode::as_sequence_mut)
                else {
                    continue;
                };
                let before = refs.len();
                refs.retain(|r| r.as_str().map(component_type) != Some(QUEUED_RETRY));
                if refs.len() != before {
                    notes.push(format!(
                        "removed processor '{QUEUED_RETRY}' from pipeline '{pipeline}'"
                    ));
                }
            }
            Ok(notes)
        })?;

        ctx.record_changes(notes);
        Ok(collector)
    }
}
