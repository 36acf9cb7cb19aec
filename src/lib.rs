//! Feature flags and A/B experiments
//!
//! - `model`: serde types shared by every layer
//! - `engine`: evaluation, assignment, lifecycle and analysis
//! - `server`: probes, metrics and shutdown for the service binary
//! - `config`: environment configuration and startup seeding

pub mod config;
pub mod engine;
pub mod model;
pub mod server;
