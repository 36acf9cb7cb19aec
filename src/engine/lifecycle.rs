//! Experiment lifecycle state machine
//!
//! | action   | allowed from             | to        |
//! |----------|--------------------------|-----------|
//! | start    | draft, paused            | running   |
//! | pause    | running                  | paused    |
//! | conclude | any                      | completed |
//! | archive  | any but running          | archived  |
//!
//! Concluding a completed experiment and archiving an archived one return
//! the experiment unchanged. A concluded experiment keeps its first
//! `ended_at`.
//!
//! Transitions are pure functions of the current experiment and `now`; the
//! service persists whatever they return.

use crate::model::{
    CreateExperimentRequest, Experiment, ExperimentStatus, Variant, DEFAULT_CONFIDENCE_LEVEL,
    DEFAULT_MIN_SAMPLE_SIZE,
};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle operation requested by an admin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Start,
    Pause,
    Conclude,
    Archive,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Start => "start",
            Action::Pause => "pause",
            Action::Conclude => "conclude",
            Action::Archive => "archive",
        })
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("cannot {action} an experiment in status {from}")]
pub struct TransitionError {
    pub from: ExperimentStatus,
    pub action: Action,
}

/// Values applied at creation when the request leaves them unset
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExperimentDefaults {
    pub min_sample_size: u64,
    pub confidence_level: f64,
}

impl Default for ExperimentDefaults {
    fn default() -> Self {
        Self {
            min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
        }
    }
}

/// Build a draft experiment and its variants from a validated request
pub fn new_experiment(
    req: CreateExperimentRequest,
    defaults: &ExperimentDefaults,
    now: DateTime<Utc>,
) -> (Experiment, Vec<Variant>) {
    let experiment_id = Uuid::new_v4();
    let name = if req.name.is_empty() {
        req.key.clone()
    } else {
        req.name
    };

    let variants = req
        .variants
        .into_iter()
        .map(|v| Variant {
            id: Uuid::new_v4(),
            experiment_id,
            name: if v.name.is_empty() {
                v.key.clone()
            } else {
                v.name
            },
            key: v.key,
            description: v.description,
            is_control: v.is_control,
            weight: v.weight,
            config: v.config,
        })
        .collect();

    let experiment = Experiment {
        id: experiment_id,
        key: req.key,
        name,
        description: req.description,
        status: ExperimentStatus::Draft,
        traffic_percentage: req.traffic_percentage,
        segment_rules: req.segment_rules.filter(|r| !r.is_empty()),
        min_sample_size: req.min_sample_size.unwrap_or(defaults.min_sample_size),
        confidence_level: req.confidence_level.unwrap_or(defaults.confidence_level),
        primary_metric: req.primary_metric,
        secondary_metrics: req.secondary_metrics,
        started_at: None,
        ended_at: None,
        created_at: now,
        updated_at: now,
    };

    (experiment, variants)
}

fn rejected(experiment: &Experiment, action: Action) -> TransitionError {
    TransitionError {
        from: experiment.status,
        action,
    }
}

/// draft | paused → running; the first start stamps `started_at`
pub fn start(experiment: &Experiment, now: DateTime<Utc>) -> Result<Experiment, TransitionError> {
    match experiment.status {
        ExperimentStatus::Draft | ExperimentStatus::Paused => Ok(Experiment {
            status: ExperimentStatus::Running,
            started_at: experiment.started_at.or(Some(now)),
            updated_at: now,
            ..experiment.clone()
        }),
        _ => Err(rejected(experiment, Action::Start)),
    }
}

/// running → paused
pub fn pause(experiment: &Experiment, now: DateTime<Utc>) -> Result<Experiment, TransitionError> {
    match experiment.status {
        ExperimentStatus::Running => Ok(Experiment {
            status: ExperimentStatus::Paused,
            updated_at: now,
            ..experiment.clone()
        }),
        _ => Err(rejected(experiment, Action::Pause)),
    }
}

/// any → completed, stamping `ended_at` unless it is already set
pub fn conclude(
    experiment: &Experiment,
    now: DateTime<Utc>,
) -> Result<Experiment, TransitionError> {
    if experiment.status == ExperimentStatus::Completed {
        return Ok(experiment.clone());
    }
    Ok(Experiment {
        status: ExperimentStatus::Completed,
        ended_at: experiment.ended_at.or(Some(now)),
        updated_at: now,
        ..experiment.clone()
    })
}

/// Any state but running → archived; a running experiment must be paused
/// or concluded first. Archiving twice is a no-op.
pub fn archive(experiment: &Experiment, now: DateTime<Utc>) -> Result<Experiment, TransitionError> {
    match experiment.status {
        ExperimentStatus::Running => Err(rejected(experiment, Action::Archive)),
        ExperimentStatus::Archived => Ok(experiment.clone()),
        _ => Ok(Experiment {
            status: ExperimentStatus::Archived,
            updated_at: now,
            ..experiment.clone()
        }),
    }
}

/// Dispatch an [`Action`] to its transition
pub fn apply(
    experiment: &Experiment,
    action: Action,
    now: DateTime<Utc>,
) -> Result<Experiment, TransitionError> {
    match action {
        Action::Start => start(experiment, now),
        Action::Pause => pause(experiment, now),
        Action::Conclude => conclude(experiment, now),
        Action::Archive => archive(experiment, now),
    }
}
