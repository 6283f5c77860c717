use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceSubresourceScale, CustomResourceSubresources,
};
use kube::{CustomResource, CustomResourceExt, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label every operator-managed resource carries
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] for resources owned by this operator
pub const MANAGED_BY_VALUE: &str = "opentelemetry-operator";

/// Label identifying which collector instance a generated object belongs to
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// OpenTelemetryCollector describes one collector deployment managed by the operator
///
/// The upgrade engine only reads and rewrites `managementState`, `upgradeStrategy`,
/// `config`, `args`, the replica fields and `status.version`. Everything else is
/// consumed by the workload reconciler.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "opentelemetry.io",
    version = "v1alpha1",
    kind = "OpenTelemetryCollector",
    shortname = "otelcol",
    namespaced,
    status = "CollectorStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Mode", "type":"string", "jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Management", "type":"string", "jsonPath":".spec.managementState"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct CollectorSpec {
    /// How the collector is deployed
    #[serde(default)]
    pub mode: Mode,

    /// Whether the operator manages this instance at all
    #[serde(rename = "managementState", default)]
    pub management_state: ManagementState,

    /// Whether the operator may rewrite this instance when it is upgraded
    #[serde(rename = "upgradeStrategy", default)]
    pub upgrade_strategy: UpgradeStrategy,

    /// Container image override for the collector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Number of collector replicas (deployment and statefulset modes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Deprecated: use `autoscaler.minReplicas`
    #[serde(rename = "minReplicas", skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,

    /// Deprecated: use `autoscaler.maxReplicas`
    #[serde(rename = "maxReplicas", skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,

    /// Horizontal pod autoscaler settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaler: Option<AutoscalerSpec>,

    /// Extra command line flags passed to the collector, keyed by flag name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,

    /// Raw collector configuration (YAML or JSON)
    #[serde(default)]
    pub config: String,
}

/// Deployment mode of the collector
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Deployment,
    DaemonSet,
    StatefulSet,
    Sidecar,
}

/// Management state of an instance
///
/// `Unmanaged` instances are never touched by the operator, including upgrades.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
}

/// Upgrade policy of an instance
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeStrategy {
    /// Apply upgrade routines when the operator is upgraded
    #[default]
    Automatic,
    /// Leave the stored spec alone; the user migrates it by hand
    None,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct AutoscalerSpec {
    #[serde(rename = "minReplicas", skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,

    #[serde(rename = "maxReplicas", skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,

    /// Target average CPU utilization, in percent
    #[serde(
        rename = "targetCPUUtilization",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_cpu_utilization: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct CollectorStatus {
    /// Operand version the stored spec was last migrated to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Replica count and pod selector served through the `/scale` subresource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ScaleStatus {
    /// Observed number of collector pods
    #[serde(default)]
    pub replicas: i32,

    /// Label selector of the collector pods, in string form
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
}

/// Path of the desired replica count, as read by autoscalers
pub const SPEC_REPLICAS_PATH: &str = ".spec.replicas";
pub const STATUS_REPLICAS_PATH: &str = ".status.scale.replicas";
pub const LABEL_SELECTOR_PATH: &str = ".status.scale.selector";

/// The collector CRD, including the `/scale` subresource
///
/// Autoscalers retargeted at the collector resource scale it through that subresource.
pub fn collector_crd() -> CustomResourceDefinition {
    let mut crd = OpenTelemetryCollector::crd();
    for version in &mut crd.spec.versions {
        version
            .subresources
            .get_or_insert_with(CustomResourceSubresources::default)
            .scale = Some(CustomResourceSubresourceScale {
            spec_replicas_path: SPEC_REPLICAS_PATH.to_string(),
            status_replicas_path: STATUS_REPLICAS_PATH.to_string(),
            label_selector_path: Some(LABEL_SELECTOR_PATH.to_string()),
        });
    }
    crd
}

impl OpenTelemetryCollector {
    /// Version recorded in the status, or "" for instances never upgraded
    pub fn status_version(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.version.as_str())
            .unwrap_or("")
    }

    pub fn set_status_version(&mut self, version: impl Into<String>) {
        self.status.get_or_insert_with(CollectorStatus::default).version = version.into();
    }

    pub fn is_unmanaged(&self) -> bool {
        self.spec.management_state == ManagementState::Unmanaged
    }

    /// Instance opted out of upgrades, either entirely or through the upgrade strategy
    pub fn skips_upgrades(&self) -> bool {
        self.is_unmanaged() || self.spec.upgrade_strategy == UpgradeStrategy::None
    }

    /// Value of the instance label on objects generated for this collector
    pub fn instance_label_value(&self) -> String {
        format!(
            "{}.{}",
            self.namespace().unwrap_or_else(|| "default".to_string()),
            self.name_any()
        )
    }

    /// Name of the workload generated for this collector
    pub fn workload_name(&self) -> String {
        format!("{}-collector", self.name_any())
    }
}

#[cfg(test)]
#[path = "collector_test.rs"]
mod tests;
