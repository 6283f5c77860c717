//! Upgrade routines shipped with the operator
//!
//! One module per operand version that changed the meaning of a stored collector spec:
//! - v0.9.0: opencensus exporter loses `reconnection_delay`
//! - v0.15.0: `--new-metrics` / `--legacy-metrics` flags are gone
//! - v0.19.0: `queued_retry` processor is gone
//! - v0.24.0: health_check `port` becomes `endpoint`
//! - v0.31.0: resource processor `labels` become `attributes`
//! - v0.36.0: TLS settings nest under `tls`
//! - v0.38.0: logging flags move to `service.telemetry.logs`
//! - v0.39.0: memory_limiter ballast moves to the memory_ballast extension
//! - v0.41.0: OTLP/HTTP CORS settings nest under `cors`
//! - v0.43.0: metrics flags move to `service.telemetry.metrics`
//! - v0.56.0: `minReplicas` defaults when only `maxReplicas` is set
//! - v0.61.0: jaeger `remote_sampling` is refused
//! - v0.78.0: legacy replica bounds move to `spec.autoscaler`
//! - v0.86.0: logging exporter `loglevel` becomes `verbosity`
//! - v0.89.0: autoscalers target the collector resource instead of its Deployment
//! - v0.104.0: finalized feature gates are dropped

mod v0_104_0;
mod v0_15_0;
mod v0_19_0;
mod v0_24_0;
mod v0_31_0;
mod v0_36_0;
mod v0_38_0;
mod v0_39_0;
mod v0_41_0;
mod v0_43_0;
mod v0_56_0;
mod v0_61_0;
mod v0_78_0;
mod v0_86_0;
mod v0_89_0;
mod v0_9_0;

use super::config_tree::{self, ConfigNode, PathWrite};
use super::registry::{RegistryError, VersionRegistry};
use super::StepError;
use crate::crd::OpenTelemetryCollector;
use std::collections::BTreeMap;

/// Build the production upgrade table
///
/// Called once at startup; the result is shared read-only.
pub fn collector_registry() -> Result<VersionRegistry, RegistryError> {
    Ok(VersionRegistry::builder()
        .register("0.9.0", v0_9_0::DropOpencensusReconnectionDelay)?
        .register("0.15.0", v0_15_0::DropLegacyMetricsFlags)?
        .register("0.19.0", v0_19_0::RemoveQueuedRetry)?
        .register("0.24.0", v0_24_0::HealthCheckPortToEndpoint)?
        .register("0.31.0", v0_31_0::ResourceLabelsToAttributes)?
        .register("0.36.0", v0_36_0::NestTlsSettings)?
        .register("0.38.0", v0_38_0::LogFlagsToTelemetry)?
        .register("0.39.0", v0_39_0::BallastToExtension)?
        .register("0.41.0", v0_41_0::NestCorsSettings)?
        .register("0.43.0", v0_43_0::MetricsFlagsToTelemetry)?
        .register("0.56.0", v0_56_0::DefaultMinReplicas)?
        .register("0.61.0", v0_61_0::RejectJaegerRemoteSampling)?
        .register("0.78.0", v0_78_0::LegacyReplicasToAutoscaler)?
        .register("0.86.0", v0_86_0::LoggingLoglevelToVerbosity)?
        .register("0.89.0", v0_89_0::RetargetAutoscalers)?
        .register("0.104.0", v0_104_0::DropFinalizedFeatureGates)?
        .build())
}

/// Run `edit` over the parsed configuration of `collector`
///
/// The text is written back, in its original format, only when the tree changed.
/// Returns the notes produced by `edit`.
pub(crate) fn edit_config<F>(
    collector: &mut OpenTelemetryCollector,
    edit: F,
) -> Result<Vec<String>, StepError>
where
    F: FnOnce(&mut ConfigNode) -> Result<Vec<String>, StepError>,
{
    let (mut tree, format) = config_tree::parse_document(&collector.spec.config)?;
    let before = tree.clone();

    let notes = edit(&mut tree)?;

    if tree != before {
        collector.spec.config = config_tree::serialize(&tree, format)?;
    }
    Ok(notes)
}

/// Type of a component id: `otlp/internal` is an `otlp` component
pub(crate) fn component_type(id: &str) -> &str {
    id.split_once('/').map_or(id, |(kind, _)| kind)
}

/// Components of `section` (receivers, exporters, ...) whose type is `kind`
pub(crate) fn components_mut<'a>(
    tree: &'a mut ConfigNode,
    section: &str,
    kind: &str,
) -> Vec<(&'a str, &'a mut ConfigNode)> {
    let Some(components) = tree.get_mut(section).and_then(ConfigNode::as_mapping_mut) else {
        return Vec::new();
    };
    components
        .iter_mut()
        .filter(|(id, _)| component_type(id) == kind)
        .map(|(id, node)| (id.as_str(), node))
        .collect()
}

/// Move sibling keys of `node` into the `target` mapping, renaming them on the way
///
/// Values already present under `target` win. Nothing moves when `target` holds
/// something other than a mapping. Returns the keys that were moved.
pub(crate) fn nest_keys(node: &mut ConfigNode, moves: &[(&str, &str)], target: &str) -> Vec<String> {
    if !matches!(
        node.get(target),
        None | Some(ConfigNode::Null) | Some(ConfigNode::Mapping(_))
    ) {
        return Vec::new();
    }

    let mut moved = Vec::new();
    for (old, new) in moves {
        let Some(value) = node.remove(old) else {
            continue;
        };
        if let Some(nested) = node.ensure_mapping(&[target]) {
            nested.entry((*new).to_string()).or_insert(value);
        }
        moved.push((*old).to_string());
    }
    moved
}

/// Remove a command line flag, accepting it with or without the leading `--`
pub(crate) fn take_flag(args: &mut BTreeMap<String, String>, flag: &str) -> Option<(String, String)> {
    let dashed = format!("--{flag}");
    [dashed, flag.to_string()]
        .into_iter()
        .find_map(|key| args.remove(&key).map(|value| (key, value)))
}

/// A command line flag superseded by a configuration key
pub(crate) struct FlagMove {
    pub flag: &'static str,
    pub path: &'static [&'static str],
    pub convert: fn(&str) -> ConfigNode,
}

/// Flag values that carry over as plain strings
pub(crate) fn text_value(value: &str) -> ConfigNode {
    ConfigNode::from(value)
}

/// Drop every flag of `moves` from the args, copying its value into the configuration
/// unless the configuration already sets that key
///
/// A flag whose target path runs into a scalar or sequence is refused rather than
/// dropped, since its value would be lost.
pub(crate) fn flags_to_config(
    collector: &mut OpenTelemetryCollector,
    moves: &[FlagMove],
) -> Result<Vec<String>, StepError> {
    let taken: Vec<_> = moves
        .iter()
        .filter_map(|m| take_flag(&mut collector.spec.args, m.flag).map(|(key, value)| (m, key, value)))
        .collect();
    if taken.is_empty() {
        return Ok(Vec::new());
    }

    edit_config(collector, |tree| {
        let mut notes = Vec::new();
        for (m, key, value) in taken {
            let path = m.path.join(".");
            match tree.set_path_if_absent(m.path, (m.convert)(&value)) {
                PathWrite::Written => notes.push(format!("moved flag '{key}' to '{path}'")),
                PathWrite::AlreadySet => notes.push(format!(
                    "removed flag '{key}', configuration already sets '{path}'"
                )),
                PathWrite::Blocked => {
                    return Err(StepError::Rejected(format!(
                        "flag '{key}' must move to '{path}', but part of that path holds a \
                         value that is not a mapping; fix the configuration or remove the flag"
                    )))
                }
            }
        }
        Ok(notes)
    })
}
