//! Operator configuration from environment variables
//!
//! | Variable | Default |
//! |---|---|
//! | `OTELOP_WATCH_NAMESPACE` | all namespaces |
//! | `OTELOP_COLLECTOR_VERSION` | operand version the binary was built for |
//! | `OTELOP_HEALTH_PORT` | 8080 |
//! | `OTELOP_AUTO_UPGRADE` | true |
//! | `POD_NAME` | unset |

use crate::upgrade::parse_version;
use semver::Version;
use thiserror::Error;

/// Operand version used when neither the build nor the environment sets one
pub const DEFAULT_COLLECTOR_VERSION: &str = match option_env!("OTELOP_COLLECTOR_VERSION") {
    Some(version) => version,
    None => "0.104.0",
};

pub const DEFAULT_HEALTH_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a semantic version, got {value:?}: {source}")]
    InvalidVersion {
        name: &'static str,
        value: String,
        #[source]
        source: semver::Error,
    },

    #[error("{name} must be a port number, got {value:?}")]
    InvalidPort { name: &'static str, value: String },

    #[error("{name} must be true or false, got {value:?}")]
    InvalidBool { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Only watch and upgrade collectors in this namespace
    pub watch_namespace: Option<String>,
    /// Operand version instances are upgraded to
    pub collector_version: Version,
    pub health_port: u16,
    /// Run the fleet upgrade at startup and upgrade collectors as they change
    pub auto_upgrade: bool,
    /// Name of this pod, reported as the event source instance
    pub pod_name: Option<String>,
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let version_text =
            get("OTELOP_COLLECTOR_VERSION").unwrap_or_else(|| DEFAULT_COLLECTOR_VERSION.to_string());
        let collector_version = parse_version(&version_text)
            .map_err(|source| ConfigError::InvalidVersion {
                name: "OTELOP_COLLECTOR_VERSION",
                value: version_text.clone(),
                source,
            })?;

        let health_port = match get("OTELOP_HEALTH_PORT") {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or(ConfigError::InvalidPort {
                    name: "OTELOP_HEALTH_PORT",
                    value,
                })?,
            None => DEFAULT_HEALTH_PORT,
        };

        let auto_upgrade = match get("OTELOP_AUTO_UPGRADE") {
            Some(value) => parse_bool("OTELOP_AUTO_UPGRADE", value)?,
            None => true,
        };

        Ok(OperatorConfig {
            watch_namespace: get("OTELOP_WATCH_NAMESPACE").map(|ns| ns.trim().to_string()),
            collector_version,
            health_port,
            auto_upgrade,
            pod_name: get("POD_NAME"),
        })
    }
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidBool { name, value }),
    }
}
