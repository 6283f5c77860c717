use super::{components_mut, edit_config};
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::config_tree::{ConfigNode, PathWrite};
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

const BALLAST_EXTENSION: &str = "memory_ballast";

/// Memory ballast moved from the memory_limiter processor to its own extension
pub struct BallastToExtension;

#[async_trait]
impl Transform for BallastToExtension {
    fn name(&self) -> &'static str {
        "ballast-to-extension"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let notes = edit_config(&mut collector, |tree| {
            let mut notes = Vec::new();
            let mut ballast = None;
            for (id, processor) in components_mut(tree, "processors", "memory_limiter") {
                if let Some(size) = processor.remove("ballast_size_mib") {
                    notes.push(format!("removed 'ballast_size_mib' from processor '{id}'"));
                    if ballast.is_none() {
                        ballast = Some(size);
                    }
                }
            }
            let Some(size) = ballast else {
                return Ok(notes);
            };

            match tree.set_path_if_absent(&["extensions", BALLAST_EXTENSION, "size_mib"], size) {
                PathWrite::Written => notes.push(format!("added extension '{BALLAST_EXTENSION}'")),
                PathWrite::AlreadySet => {}
                PathWrite::Blocked => {
                    return Err(StepError::Rejected(format!(
                        "'ballast_size_mib' must move to extension '{BALLAST_EXTENSION}', but \
                         'extensions' is not a mapping; fix the configuration first"
                    )))
                }
            }
            if enable_extension(tree, BALLAST_EXTENSION) {
                notes.push(format!("enabled extension '{BALLAST_EXTENSION}' in the service"));
            }
            Ok(notes)
        })?;

        ctx.record_changes(notes);
        Ok(collector)
    }
}

/// Add `name` to `service.extensions` unless it is already listed
fn enable_extension(tree: &mut ConfigNode, name: &str) -> bool {
    let Some(service) = tree.ensure_mapping(&["service"]) else {
        return false;
    };
    let extensions = service
        .entry("extensions".to_string())
        .or_insert(ConfigNode::Null);
    if extensions.is_null() {
        *extensions = ConfigNode::Sequence(Vec::new());
    }
    let Some(enabled) = extensions.as_sequence_mut() else {
        return false;
    };
    if enabled.iter().any(|e| e.as_str() == Some(name)) {
        return false;
    }
    enabled.push(ConfigNode::from(name));
    true
}
