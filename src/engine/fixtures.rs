//! Builders shared by the engine's unit tests

use crate::model::{
    Experiment, ExperimentStatus, Flag, FlagStatus, FlagType, Variant, DEFAULT_CONFIDENCE_LEVEL,
    DEFAULT_MIN_SAMPLE_SIZE,
};
use chrono::{TimeZone, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Fixed instant tests start their clocks at
pub fn epoch() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn test_flag(key: &str, flag_type: FlagType) -> Flag {
    Flag {
        id: Uuid::new_v4(),
        key: key.to_string(),
        name: key.to_string(),
        description: None,
        flag_type,
        status: FlagStatus::Active,
        enabled: true,
        rollout_percentage: 0,
        allowed_subjects: BTreeSet::new(),
        blocked_subjects: BTreeSet::new(),
        segment_rules: None,
        tags: Vec::new(),
        created_at: epoch(),
        updated_at: epoch(),
    }
}

pub fn test_experiment(key: &str, status: ExperimentStatus) -> Experiment {
    Experiment {
        id: Uuid::new_v4(),
        key: key.to_string(),
        name: key.to_string(),
        description: None,
        status,
        traffic_percentage: 100,
        segment_rules: None,
        min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
        confidence_level: DEFAULT_CONFIDENCE_LEVEL,
        primary_metric: "conversion".to_string(),
        secondary_metrics: Vec::new(),
        started_at: None,
        ended_at: None,
        created_at: epoch(),
        updated_at: epoch(),
    }
}

pub fn test_variant(experiment: &Experiment, key: &str, is_control: bool, weight: i32) -> Variant {
    Variant {
        id: Uuid::new_v4(),
        experiment_id: experiment.id,
        key: key.to_string(),
        name: key.to_string(),
        description: None,
        is_control,
        weight,
        config: serde_json::Value::Null,
    }
}
