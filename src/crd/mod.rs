pub mod collector;

pub use collector::{
    collector_crd, AutoscalerSpec, CollectorSpec, CollectorStatus, ManagementState, Mode,
    OpenTelemetryCollector, ScaleStatus, UpgradeStrategy, INSTANCE_LABEL, MANAGED_BY_LABEL,
    MANAGED_BY_VALUE,
};
