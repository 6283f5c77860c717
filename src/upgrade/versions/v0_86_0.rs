use super::{components_mut, edit_config};
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::config_tree::ConfigNode;
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

/// The logging exporter replaced `loglevel` with `verbosity`
pub struct LoggingLoglevelToVerbosity;

fn verbosity_for(level: &str) -> Option<&'static str> {
    match level {
        "debug" => Some("detailed"),
        "info" => Some("normal"),
        "warn" | "error" => Some("basic"),
        _ => None,
    }
}

#[async_trait]
impl Transform for LoggingLoglevelToVerbosity {
    fn name(&self) -> &'static str {
        "logging-loglevel-to-verbosity"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let notes = edit_config(&mut collector, |tree| {
            let mut notes = Vec::new();
            for (id, exporter) in components_mut(tree, "exporters", "logging") {
                let Some(level) = exporter.get("loglevel").and_then(ConfigNode::scalar_text) else {
                    continue;
                };
                // Unknown levels are left for the collector to report
                let Some(verbosity) = verbosity_for(&level) else {
                    continue;
                };
                exporter.remove("loglevel");
                if exporter.has_path(&["verbosity"]) {
                    notes.push(format!("removed 'loglevel' from exporter '{id}'"));
                    continue;
                }
                if let Some(map) = exporter.as_mapping_mut() {
                    map.insert("verbosity".to_string(), ConfigNode::from(verbosity));
                }
                notes.push(format!(
                    "replaced 'loglevel: {level}' with 'verbosity: {verbosity}' in exporter '{id}'"
                ));
            }
            Ok(notes)
        })?;

        ctx.record_changes(notes);
        Ok(collector)
    }
}
