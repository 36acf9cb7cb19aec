//! Experiment administration, assignment and results façade

use crate::engine::analysis::analyze;
use crate::engine::assignment::AssignmentTracker;
use crate::engine::bucketing::ordered_variants;
use crate::engine::clock::Clock;
use crate::engine::error::ServiceError;
use crate::engine::lifecycle::{self, Action, ExperimentDefaults};
use crate::engine::store::ExperimentStore;
use crate::engine::validation::validate_new_experiment;
use crate::model::{
    CreateExperimentRequest, Experiment, ExperimentResults, ExperimentStatus,
    ExperimentWithVariants, TrackEventRequest, UserContext, Variant,
};
use crate::server::SharedMetrics;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct ExperimentService {
    store: Arc<dyn ExperimentStore>,
    clock: Arc<dyn Clock>,
    defaults: ExperimentDefaults,
    tracker: AssignmentTracker,
}

impl ExperimentService {
    pub fn new(
        store: Arc<dyn ExperimentStore>,
        clock: Arc<dyn Clock>,
        defaults: ExperimentDefaults,
        metrics: Option<SharedMetrics>,
    ) -> Self {
        let tracker = AssignmentTracker::new(store.clone(), clock.clone()).with_metrics(metrics);
        Self {
            store,
            clock,
            defaults,
            tracker,
        }
    }

    /// Create an experiment in draft together with its variants
    ///
    /// # Errors
    /// * `Validation` - bad request, or the key is already taken
    /// * `Store` - the store failed
    pub async fn create_experiment(
        &self,
        req: CreateExperimentRequest,
    ) -> Result<ExperimentWithVariants, ServiceError> {
        validate_new_experiment(&req)?;

        let (experiment, variants) =
            lifecycle::new_experiment(req, &self.defaults, self.clock.now());
        self.store
            .insert_experiment(experiment.clone(), variants.clone())
            .await
            .map_err(|e| ServiceError::from_insert("experiment", &experiment.key, e))?;

        info!(
            experiment = %experiment.key,
            variants = variants.len(),
            "Experiment created"
        );
        Ok(with_ordered_variants(experiment, variants))
    }

    pub async fn start_experiment(&self, id: Uuid) -> Result<Experiment, ServiceError> {
        self.transition(id, Action::Start).await
    }

    pub async fn pause_experiment(&self, id: Uuid) -> Result<Experiment, ServiceError> {
        self.transition(id, Action::Pause).await
    }

    pub async fn conclude_experiment(&self, id: Uuid) -> Result<Experiment, ServiceError> {
        self.transition(id, Action::Conclude).await
    }

    pub async fn archive_experiment(&self, id: Uuid) -> Result<Experiment, ServiceError> {
        self.transition(id, Action::Archive).await
    }

    /// Newest first, optionally filtered by status
    pub async fn list_experiments(
        &self,
        status: Option<ExperimentStatus>,
    ) -> Result<Vec<Experiment>, ServiceError> {
        Ok(self.store.list_experiments(status).await?)
    }

    /// The experiment with its variants, control first then by key
    pub async fn get_experiment(&self, id: Uuid) -> Result<ExperimentWithVariants, ServiceError> {
        let experiment = self.load(id).await?;
        let variants = self.store.list_variants(id).await?;
        Ok(with_ordered_variants(experiment, variants))
    }

    pub async fn get_variant_for_user(
        &self,
        experiment_key: &str,
        ctx: &UserContext,
    ) -> Option<Variant> {
        self.tracker.get_variant(experiment_key, ctx).await
    }

    pub async fn track_event(
        &self,
        subject_id: &str,
        req: TrackEventRequest,
    ) -> Result<(), ServiceError> {
        self.tracker.track_event(subject_id, req).await
    }

    /// Current metrics and significance verdict
    pub async fn get_results(&self, id: Uuid) -> Result<ExperimentResults, ServiceError> {
        let experiment = self.load(id).await?;
        let metrics = self.store.variant_metrics(id).await?;

        let mut results = analyze(
            metrics,
            experiment.min_sample_size,
            experiment.confidence_level,
        );
        results.experiment_id = experiment.id;
        results.experiment_key = experiment.key;
        Ok(results)
    }

    async fn load(&self, id: Uuid) -> Result<Experiment, ServiceError> {
        self.store
            .get_experiment(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("experiment", id))
    }

    async fn transition(&self, id: Uuid, action: Action) -> Result<Experiment, ServiceError> {
        let current = self.load(id).await?;
        let next = lifecycle::apply(&current, action, self.clock.now())?;
        self.store
            .update_experiment(next.clone(), current.status)
            .await
            .map_err(|e| ServiceError::from_update("experiment", &current.key, e))?;

        info!(
            experiment = %next.key,
            from = %current.status,
            to = %next.status,
            "Experiment {}",
            action
        );
        Ok(next)
    }
}

fn with_ordered_variants(experiment: Experiment, variants: Vec<Variant>) -> ExperimentWithVariants {
    let variants = ordered_variants(&variants).into_iter().cloned().collect();
    ExperimentWithVariants {
        experiment,
        variants,
    }
}

#[cfg(test)]
#[path = "experiments_test.rs"]
mod tests;
