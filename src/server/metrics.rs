//! Prometheus metrics for flag evaluation and experiment tracking
//!
//! Every engine component takes an `Option<SharedMetrics>` so metrics can
//! be left out of tests and embedded uses.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics registry shared between the engine and the `/metrics` endpoint
pub type SharedMetrics = Arc<EngineMetrics>;

pub struct EngineMetrics {
    registry: Registry,
    flag_evaluations: IntCounterVec,
    cache_reloads: IntCounterVec,
    assignments: IntCounterVec,
    events: IntCounterVec,
}

impl EngineMetrics {
    /// Register all metric families in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let flag_evaluations = IntCounterVec::new(
            Opts::new(
                "kokeilu_flag_evaluations_total",
                "Flag evaluations by decision source",
            ),
            &["source"],
        )?;
        registry.register(Box::new(flag_evaluations.clone()))?;

        let cache_reloads = IntCounterVec::new(
            Opts::new(
                "kokeilu_flag_cache_reloads_total",
                "Full reloads of the flag cache snapshot",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(cache_reloads.clone()))?;

        let assignments = IntCounterVec::new(
            Opts::new(
                "kokeilu_experiment_assignments_total",
                "Variant lookups by assignment outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(assignments.clone()))?;

        let events = IntCounterVec::new(
            Opts::new(
                "kokeilu_experiment_events_total",
                "Tracked experiment events by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(events.clone()))?;

        Ok(Self {
            registry,
            flag_evaluations,
            cache_reloads,
            assignments,
            events,
        })
    }

    pub fn record_evaluation(&self, source: &str) {
        self.flag_evaluations.with_label_values(&[source]).inc();
    }

    pub fn record_cache_reload(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.cache_reloads.with_label_values(&[outcome]).inc();
    }

    /// `outcome` is one of "new", "existing" or "not_enrolled"
    pub fn record_assignment(&self, outcome: &str) {
        self.assignments.with_label_values(&[outcome]).inc();
    }

    pub fn record_event(&self, recorded: bool) {
        let outcome = if recorded { "recorded" } else { "dropped" };
        self.events.with_label_values(&[outcome]).inc();
    }

    /// Encode all metrics in the Prometheus text exposition format
    pub fn encode(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}

/// Create the shared metrics registry
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(EngineMetrics::new()?))
}
