use super::{components_mut, edit_config, nest_keys};
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

const CORS_KEYS: [(&str, &str); 2] = [
    ("cors_allowed_origins", "allowed_origins"),
    ("cors_allowed_headers", "allowed_headers"),
];

/// OTLP/HTTP CORS options nest under `cors`
pub struct NestCorsSettings;

#[async_trait]
impl Transform for NestCorsSettings {
    fn name(&self) -> &'static str {
        "nest-cors-settings"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let notes = edit_config(&mut collector, |tree| {
            let mut notes = Vec::new();
            for (id, receiver) in components_mut(tree, "receivers", "otlp") {
                let Some(http) = receiver.get_path_mut(&["protocols", "http"]) else {
                    continue;
                };
                for key in nest_keys(http, &CORS_KEYS, "cors") {
                    notes.push(format!(
                        "moved '{key}' under 'cors' in receiver '{id}' (protocols.http)"
                    ));
                }
            }
            Ok(notes)
        })?;

        ctx.record_changes(notes);
        Ok(collector)
    }
}
