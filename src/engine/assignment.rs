//! Experiment variant assignment and event tracking
//!
//! A subject is assigned on its first qualifying lookup and keeps that
//! variant for the life of the experiment. Bucketing is deterministic, so
//! two instances racing on a first touch pick the same variant and the
//! store's insert-if-absent keeps exactly one row.
//!
//! Both paths are best-effort: store failures are logged and absorbed so a
//! caller's business flow never fails because of an experiment.

use crate::engine::bucketing::{bucket_variant, in_rollout};
use crate::engine::clock::Clock;
use crate::engine::error::ServiceError;
use crate::engine::segment;
use crate::engine::store::ExperimentStore;
use crate::engine::validation::validate_track_event;
use crate::model::{
    Experiment, ExperimentAssignment, ExperimentEvent, ExperimentStatus, TrackEventRequest,
    UserContext, Variant,
};
use crate::server::SharedMetrics;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct AssignmentTracker {
    store: Arc<dyn ExperimentStore>,
    clock: Arc<dyn Clock>,
    metrics: Option<SharedMetrics>,
}

impl AssignmentTracker {
    pub fn new(store: Arc<dyn ExperimentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<SharedMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    fn record_assignment(&self, outcome: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_assignment(outcome);
        }
    }

    fn record_event(&self, recorded: bool) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_event(recorded);
        }
    }

    /// Variant the subject sees in the experiment, if enrolled
    ///
    /// `None` means "not enrolled": unknown or non-running experiment,
    /// outside the traffic share, failing the segment rules, or a store
    /// failure along the way.
    pub async fn get_variant(&self, experiment_key: &str, ctx: &UserContext) -> Option<Variant> {
        let experiment = match self.store.get_experiment_by_key(experiment_key).await {
            Ok(Some(exp)) if exp.status == ExperimentStatus::Running => exp,
            Ok(_) => {
                self.record_assignment("not_enrolled");
                return None;
            }
            Err(e) => {
                warn!(experiment = %experiment_key, error = %e, "Experiment lookup failed");
                self.record_assignment("not_enrolled");
                return None;
            }
        };

        if !self.eligible(&experiment, ctx) {
            self.record_assignment("not_enrolled");
            return None;
        }

        let (variant, outcome) = self.resolve(&experiment, ctx).await;
        self.record_assignment(if variant.is_some() {
            outcome
        } else {
            "not_enrolled"
        });
        variant
    }

    fn eligible(&self, experiment: &Experiment, ctx: &UserContext) -> bool {
        if !in_rollout(
            &experiment.key,
            &ctx.subject_id,
            experiment.traffic_percentage,
        ) {
            debug!(
                experiment = %experiment.key,
                subject = %ctx.subject_id,
                "Subject outside experiment traffic"
            );
            return false;
        }

        if let Some(rules) = &experiment.segment_rules {
            if !segment::matches(ctx, rules) {
                debug!(
                    experiment = %experiment.key,
                    subject = %ctx.subject_id,
                    "Subject outside experiment segment"
                );
                return false;
            }
        }

        true
    }

    /// Existing or new assignment, with "existing" or "new" as the outcome
    async fn resolve(
        &self,
        experiment: &Experiment,
        ctx: &UserContext,
    ) -> (Option<Variant>, &'static str) {
        let subject_id = ctx.subject_id.as_str();

        let variants = match self.store.list_variants(experiment.id).await {
            Ok(variants) => variants,
            Err(e) => {
                warn!(experiment = %experiment.key, error = %e, "Variant lookup failed");
                return (None, "new");
            }
        };

        let existing = match self.store.get_assignment(experiment.id, subject_id).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(
                    experiment = %experiment.key,
                    subject = %subject_id,
                    error = %e,
                    "Assignment lookup failed"
                );
                return (None, "new");
            }
        };

        if let Some(assignment) = existing {
            return (
                find_variant(&variants, &assignment, &experiment.key),
                "existing",
            );
        }

        let Some(chosen) = bucket_variant(&experiment.key, subject_id, &variants).cloned() else {
            return (None, "new");
        };
        let assignment = ExperimentAssignment {
            id: Uuid::new_v4(),
            experiment_id: experiment.id,
            subject_id: subject_id.to_string(),
            variant_id: chosen.id,
            assigned_at: self.clock.now(),
        };

        match self.store.insert_assignment_if_absent(assignment).await {
            Ok(surviving) if surviving.variant_id != chosen.id => {
                // Lost a race to a writer with a different variant list
                (
                    find_variant(&variants, &surviving, &experiment.key),
                    "existing",
                )
            }
            Ok(_) => {
                info!(
                    experiment = %experiment.key,
                    subject = %subject_id,
                    variant = %chosen.key,
                    "Subject assigned to variant"
                );
                (Some(chosen), "new")
            }
            Err(e) => {
                warn!(
                    experiment = %experiment.key,
                    subject = %subject_id,
                    error = %e,
                    "Failed to persist assignment, serving bucketed variant"
                );
                (Some(chosen), "new")
            }
        }
    }

    /// Record an event for a subject's assignment
    ///
    /// Requests are validated, but an unknown experiment, a subject
    /// without an assignment, or a store failure all return `Ok(())`
    /// with nothing stored.
    pub async fn track_event(
        &self,
        subject_id: &str,
        req: TrackEventRequest,
    ) -> Result<(), ServiceError> {
        validate_track_event(&req)?;

        let experiment = match self.store.get_experiment_by_key(&req.experiment_key).await {
            Ok(Some(exp)) => exp,
            Ok(None) => {
                debug!(experiment = %req.experiment_key, "Event for unknown experiment dropped");
                self.record_event(false);
                return Ok(());
            }
            Err(e) => {
                warn!(
                    experiment = %req.experiment_key,
                    error = %e,
                    "Experiment lookup failed, event dropped"
                );
                self.record_event(false);
                return Ok(());
            }
        };

        let assignment = match self.store.get_assignment(experiment.id, subject_id).await {
            Ok(Some(assignment)) => assignment,
            Ok(None) => {
                debug!(
                    experiment = %experiment.key,
                    subject = %subject_id,
                    "Event for unassigned subject dropped"
                );
                self.record_event(false);
                return Ok(());
            }
            Err(e) => {
                warn!(
                    experiment = %experiment.key,
                    subject = %subject_id,
                    error = %e,
                    "Assignment lookup failed, event dropped"
                );
                self.record_event(false);
                return Ok(());
            }
        };

        let event = ExperimentEvent {
            id: Uuid::new_v4(),
            experiment_id: experiment.id,
            subject_id: subject_id.to_string(),
            variant_id: assignment.variant_id,
            event_type: req.event_type,
            value: req.value,
            metadata: req.metadata,
            created_at: self.clock.now(),
        };

        match self.store.append_event(event).await {
            Ok(()) => self.record_event(true),
            Err(e) => {
                warn!(
                    experiment = %experiment.key,
                    subject = %subject_id,
                    error = %e,
                    "Failed to store event, dropped"
                );
                self.record_event(false);
            }
        }

        Ok(())
    }
}

/// Resolve a stored assignment against the current variant list
///
/// A variant removed after assignment leaves the subject unenrolled; it is
/// not re-bucketed.
fn find_variant(
    variants: &[Variant],
    assignment: &ExperimentAssignment,
    experiment_key: &str,
) -> Option<Variant> {
    let found = variants.iter().find(|v| v.id == assignment.variant_id);
    if found.is_none() {
        warn!(
            experiment = %experiment_key,
            subject = %assignment.subject_id,
            variant_id = %assignment.variant_id,
            "Assignment references a variant that no longer exists"
        );
    }
    found.cloned()
}

#[cfg(test)]
#[path = "assignment_test.rs"]
mod tests;
