//! Version upgrade engine for collector instances
//!
//! Each operator release that changed the meaning of a stored collector spec ships an
//! upgrade routine. Routines are kept in a [`VersionRegistry`] ordered by the version
//! that introduced them. When an instance is found at an older version, every routine
//! in `(instance version, running version]` is applied in ascending order and the
//! instance's `status.version` is advanced to the running version.
//!
//! Modules:
//! - `config_tree`: configuration codec (typed tree, sorted serialization)
//! - `registry`: the ordered routine table and the driver
//! - `context`: per-pass context (target version, events, cluster handles)
//! - `cluster`: traits for the Kubernetes objects the engine reads and writes
//! - `fleet`: per-instance persistence and the fleet-wide scan
//! - `versions`: the production routines

pub mod cluster;
pub mod config_tree;
pub mod context;
pub mod fleet;
pub mod registry;
pub mod versions;

pub use cluster::{AutoscalerStore, CollectorStore, KubeAutoscalerStore, KubeCollectorStore};
pub use config_tree::{CodecError, ConfigFormat, ConfigNode, Mapping, PathWrite};
pub use context::{EventPublisher, KubeEventPublisher, UpgradeContext};
pub use fleet::{upgrade_fleet, upgrade_instance, FleetReport, InstanceOutcome};
pub use registry::{
    Migration, RegistryBuilder, RegistryError, Transform, VersionRegistry, VersionedTransform,
};
pub use versions::collector_registry;

use semver::Version;
use thiserror::Error;

/// Parse an operand version as written by users and older releases
///
/// Surrounding whitespace and a leading `v` are accepted: `v0.60.0` is `0.60.0`.
pub fn parse_version(text: &str) -> Result<Version, semver::Error> {
    let text = text.trim();
    Version::parse(text.strip_prefix('v').unwrap_or(text))
}

/// Errors surfaced by an upgrade pass
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// The stored configuration could not be parsed or written back
    #[error("collector configuration error: {0}")]
    Config(#[from] CodecError),

    /// `status.version` is not a semantic version
    #[error("status version {version:?} is not a valid semantic version: {source}")]
    VersionParse {
        version: String,
        #[source]
        source: semver::Error,
    },

    /// An upgrade routine refused to migrate the instance
    #[error("upgrade to v{version} failed: {reason}")]
    Transform { version: Version, reason: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to build patch: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single upgrade routine
///
/// The driver attaches the routine's version when converting into [`UpgradeError`].
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Config(#[from] CodecError),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl StepError {
    pub(crate) fn at_version(self, version: &Version) -> UpgradeError {
        match self {
            StepError::Rejected(reason) => UpgradeError::Transform {
                version: version.clone(),
                reason,
            },
            StepError::Config(e) => UpgradeError::Config(e),
            StepError::Kube(e) => UpgradeError::Kube(e),
        }
    }
}
