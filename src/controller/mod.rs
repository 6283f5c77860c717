//! Collector controller
//!
//! Watches OpenTelemetryCollector resources and keeps every changed or newly created
//! instance at the running operand version. Building the collector workloads is left
//! to the workload reconciler.

pub mod reconcile;

pub use reconcile::{error_policy, reconcile, Context, ReconcileError};
