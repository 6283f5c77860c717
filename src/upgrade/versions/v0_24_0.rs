use super::{components_mut, edit_config};
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::config_tree::ConfigNode;
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

/// The health_check extension takes a listen `endpoint` instead of a bare `port`
pub struct HealthCheckPortToEndpoint;

#[async_trait]
impl Transform for HealthCheckPortToEndpoint {
    fn name(&self) -> &'static str {
        "health-check-port-to-endpoint"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let notes = edit_config(&mut collector, |tree| {
            let mut notes = Vec::new();
            for (id, extension) in components_mut(tree, "extensions", "health_check") {
                let Some(port) = extension.remove("port") else {
                    continue;
                };
                match port.scalar_text() {
                    Some(port) if !extension.has_path(&["endpoint"]) => {
                        let endpoint = format!("0.0.0.0:{port}");
                        if let Some(map) = extension.as_mapping_mut() {
                            map.insert("endpoint".to_string(), ConfigNode::from(endpoint.clone()));
                        }
                        notes.push(format!(
                            "replaced 'port' with 'endpoint: {endpoint}' in extension '{id}'"
                        ));
                    }
                    _ => notes.push(format!("removed property 'port' from extension '{id}'")),
                }
            }
            Ok(notes)
        })?;

        ctx.record_changes(notes);
        Ok(collector)
    }
}
