use super::{flags_to_config, text_value, FlagMove};
use crate::crd::OpenTelemetryCollector;
use crate::upgrade::config_tree::ConfigNode;
use crate::upgrade::registry::Transform;
use crate::upgrade::{StepError, UpgradeContext};
use async_trait::async_trait;

const LOG_FLAGS: [FlagMove; 3] = [
    FlagMove {
        flag: "log-level",
        path: &["service", "telemetry", "logs", "level"],
        convert: text_value,
    },
    FlagMove {
        flag: "log-profile",
        path: &["service", "telemetry", "logs", "development"],
        convert: development_profile,
    },
    FlagMove {
        flag: "log-format",
        path: &["service", "telemetry", "logs", "encoding"],
        convert: text_value,
    },
];

fn development_profile(profile: &str) -> ConfigNode {
    ConfigNode::Bool(profile == "dev")
}

/// Logging flags were replaced by `service.telemetry.logs`
pub struct LogFlagsToTelemetry;

#[async_trait]
impl Transform for LogFlagsToTelemetry {
    fn name(&self) -> &'static str {
        "log-flags-to-telemetry"
    }

    async fn apply(
        &self,
        ctx: &UpgradeContext,
        mut collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError> {
        let notes = flags_to_config(&mut collector, &LOG_FLAGS)?;
        ctx.record_changes(notes);
        Ok(collector)
    }
}
