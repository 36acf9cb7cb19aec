//! Operational surface of the service
//!
//! - `/healthz` - Liveness probe (process is running)
//! - `/readyz` - Readiness probe (flag cache warmed, not draining)
//! - `/metrics` - Prometheus metrics shared with the engine
//!
//! Also provides graceful shutdown handling for SIGTERM/SIGINT.

mod health;
pub mod metrics;
pub mod shutdown;

pub use health::{run_health_server, ReadinessState};
pub use metrics::{create_metrics, EngineMetrics, SharedMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
