//! Ordered table of upgrade routines and the driver that applies them

use super::context::UpgradeContext;
use super::{parse_version, StepError, UpgradeError};
use crate::crd::OpenTelemetryCollector;
use async_trait::async_trait;
use kube::ResourceExt;
use semver::Version;
use thiserror::Error;
use tracing::{debug, info};

/// One migration step
///
/// Each released version that changed the meaning of a stored spec implements this
/// trait. Implementations must treat missing keys as a no-op and must be idempotent.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Migrate `collector` and hand it to the next step
    async fn apply(
        &self,
        ctx: &UpgradeContext,
        collector: OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, StepError>;
}

/// A transform and the version that introduced it
pub struct VersionedTransform {
    pub version: Version,
    pub transform: Box<dyn Transform>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid upgrade version {version:?}: {source}")]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("more than one upgrade routine registered for v{0}")]
    Duplicate(Version),
}

/// Collects transforms before freezing them into a [`VersionRegistry`]
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<VersionedTransform>,
}

impl RegistryBuilder {
    pub fn register(
        mut self,
        version: &str,
        transform: impl Transform + 'static,
    ) -> Result<Self, RegistryError> {
        let version = Version::parse(version).map_err(|source| RegistryError::InvalidVersion {
            version: version.to_string(),
            source,
        })?;
        if self.entries.iter().any(|e| e.version == version) {
            return Err(RegistryError::Duplicate(version));
        }
        self.entries.push(VersionedTransform {
            version,
            transform: Box::new(transform),
        });
        Ok(self)
    }

    pub fn build(mut self) -> VersionRegistry {
        self.entries.sort_by(|a, b| a.version.cmp(&b.version));
        VersionRegistry {
            entries: self.entries,
        }
    }
}

/// Immutable, ascending table of upgrade routines
///
/// Built once at startup and shared read-only afterwards.
pub struct VersionRegistry {
    entries: Vec<VersionedTransform>,
}

impl VersionRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Highest registered version
    pub fn latest(&self) -> Option<&Version> {
        self.entries.last().map(|e| &e.version)
    }

    pub fn versions(&self) -> impl Iterator<Item = &Version> {
        self.entries.iter().map(|e| &e.version)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Transforms with `from < version <= to`, ascending
    ///
    /// Empty when `to <= from`.
    pub fn pending<'a>(
        &'a self,
        from: &'a Version,
        to: &'a Version,
    ) -> impl Iterator<Item = &'a VersionedTransform> + 'a {
        self.entries
            .iter()
            .filter(move |e| &e.version > from && &e.version <= to)
    }

    /// Migrate one instance up to `ctx.target_version`
    ///
    /// Works on a clone of `collector`. On success the returned instance carries the
    /// target version in its status, unless the stored version is already newer (it is
    /// then kept as is). Unmanaged instances and instances without a recorded version
    /// come back unchanged; the caller decides which version a new instance starts at.
    pub async fn upgrade(
        &self,
        ctx: &UpgradeContext,
        collector: &OpenTelemetryCollector,
    ) -> Result<OpenTelemetryCollector, UpgradeError> {
        self.migrate(ctx, collector).await.map(|m| m.collector)
    }

    /// [`upgrade`](Self::upgrade), also returning the changes the routines reported
    ///
    /// Changes are only collected. Publishing them is left to the caller, after the
    /// instance has been written back.
    pub async fn migrate(
        &self,
        ctx: &UpgradeContext,
        collector: &OpenTelemetryCollector,
    ) -> Result<Migration, UpgradeError> {
        let name = collector.name_any();

        if collector.is_unmanaged() {
            debug!(collector = %name, "Skipping upgrade of unmanaged instance");
            return Ok(Migration::unchanged(collector));
        }

        let recorded = collector.status_version();
        if recorded.is_empty() {
            debug!(collector = %name, "Instance has no recorded version");
            return Ok(Migration::unchanged(collector));
        }

        let from = parse_version(recorded).map_err(|source| UpgradeError::VersionParse {
            version: recorded.to_string(),
            source,
        })?;
        let target = &ctx.target_version;
        let run = ctx.for_instance();

        let mut current = collector.clone();
        for step in self.pending(&from, target) {
            debug!(
                collector = %name,
                version = %step.version,
                transform = step.transform.name(),
                "Applying upgrade step"
            );
            current = step
                .transform
                .apply(&run, current)
                .await
                .map_err(|e| e.at_version(&step.version))?;

            if let Some(ref metrics) = ctx.metrics {
                metrics.record_upgrade_step(&step.version.to_string());
            }
        }

        if from <= *target {
            current.set_status_version(target.to_string());
        }

        if from < *target {
            info!(collector = %name, from = %from, to = %target, "Instance upgraded");
        }
        Ok(Migration {
            collector: current,
            changes: run.take_changes(),
        })
    }
}

/// An upgraded instance and the changes made to it, in the order they were applied
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub collector: OpenTelemetryCollector,
    pub changes: Vec<String>,
}

impl Migration {
    fn unchanged(collector: &OpenTelemetryCollector) -> Self {
        Self {
            collector: collector.clone(),
            changes: Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
