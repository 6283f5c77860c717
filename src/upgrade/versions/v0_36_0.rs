use super::{component_type, edit_config, nest_keys};
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::config_tree::ConfigNode;
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

/// Client TLS options of the otlp exporter that used to sit at the top level
const OTLP_TLS_KEYS: [&str; 6] = [
    "insecure",
    "insecure_skip_verify",
    "ca_file",
    "cert_file",
    "key_file",
    "server_name_override",
];

/// TLS options moved under a single `tls` key
///
/// Every receiver and exporter renames `tls_settings` to `tls`, and the otlp exporter
/// nests its flat client TLS options there as well.
pub struct NestTlsSettings;

#[async_trait]
impl Transform for NestTlsSettings {
    fn name(&self) -> &'static str {
        "nest-tls-settings"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let notes = edit_config(&mut collector, |tree| {
            let mut notes = Vec::new();
            for section in ["receivers", "exporters"] {
                let Some(components) = tree.get_mut(section).and_then(ConfigNode::as_mapping_mut)
                else {
                    continue;
                };
                let kind = &section[..section.len() - 1];
                for (id, component) in components.iter_mut() {
                    if rename_tls_settings(component) {
                        notes.push(format!("renamed 'tls_settings' to 'tls' in {kind} '{id}'"));
                    }
                    if section == "exporters" && component_type(id) == "otlp" {
                        let moves: Vec<(&str, &str)> =
                            OTLP_TLS_KEYS.iter().map(|key| (*key, *key)).collect();
                        for key in nest_keys(component, &moves, "tls") {
                            notes.push(format!("moved '{key}' under 'tls' in exporter '{id}'"));
                        }
                    }
                }
            }
            Ok(notes)
        })?;

        ctx.record_changes(notes);
        Ok(collector)
    }
}

/// Fold `tls_settings` into `tls`, keeping values already under `tls`
fn rename_tls_settings(component: &mut ConfigNode) -> bool {
    if component.get("tls_settings").is_none()
        || !matches!(
            component.get("tls"),
            None | Some(ConfigNode::Null) | Some(ConfigNode::Mapping(_))
        )
    {
        return false;
    }
    let Some(settings) = component.remove("tls_settings") else {
        return false;
    };
    if let (ConfigNode::Mapping(settings), Some(tls)) = (settings, component.ensure_mapping(&["tls"])) {
        for (key, value) in settings {
            tls.entry(key).or_insert(value);
        }
    }
    true
}
