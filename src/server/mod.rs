//! HTTP endpoints, metrics and shutdown handling
//!
//! - `/healthz`, `/readyz` and `/metrics` served by axum
//! - Prometheus metrics shared with the upgrade engine
//! - SIGTERM/SIGINT driven graceful shutdown

mod health;
pub mod metrics;
pub mod shutdown;

pub use health::{run_health_server, ReadinessState};
pub use metrics::{create_metrics, OperatorMetrics, SharedMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
