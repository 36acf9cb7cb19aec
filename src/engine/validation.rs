//! Validation of administrative requests
//!
//! Runs before anything reaches the store. Key uniqueness is the one rule
//! the store enforces itself; the services translate its `Conflict` into
//! [`ValidationError::DuplicateKey`].

use crate::model::{
    CreateExperimentRequest, CreateFlagRequest, CreateOverrideRequest, FlagStatus,
    TrackEventRequest, UpdateFlagRequest,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{kind} key '{key}' already exists")]
    DuplicateKey { kind: &'static str, key: String },

    #[error("{0} key cannot be empty")]
    EmptyKey(&'static str),

    #[error("{field} must be 0-100, got {value}")]
    PercentageOutOfRange { field: &'static str, value: i32 },

    #[error("confidenceLevel must be between 0 and 1 exclusive, got {0}")]
    ConfidenceOutOfRange(f64),

    #[error("experiment needs at least one variant")]
    NoVariants,

    #[error("variant weights must sum to 100, got {0}")]
    WeightSum(i32),

    #[error("variant '{key}' has negative weight {weight}")]
    NegativeWeight { key: String, weight: i32 },

    #[error("experiment needs a control variant")]
    NoControl,

    #[error("variant key '{0}' is used more than once")]
    DuplicateVariantKey(String),

    #[error("invalid expiry timestamp '{value}': {reason}")]
    InvalidExpiry { value: String, reason: String },

    #[error("event value must be a finite number, got {0}")]
    InvalidEventValue(f64),

    #[error("flags are archived through the archive operation")]
    ArchiveViaUpdate,

    #[error("archived flag '{0}' cannot be modified")]
    FlagArchived(String),
}

fn validate_key(kind: &'static str, key: &str) -> Result<(), ValidationError> {
    if key.trim().is_empty() {
        return Err(ValidationError::EmptyKey(kind));
    }
    Ok(())
}

fn validate_percentage(field: &'static str, value: i32) -> Result<(), ValidationError> {
    if !(0..=100).contains(&value) {
        return Err(ValidationError::PercentageOutOfRange { field, value });
    }
    Ok(())
}

/// Validate a flag creation request
pub fn validate_new_flag(req: &CreateFlagRequest) -> Result<(), ValidationError> {
    validate_key("flag", &req.key)?;
    validate_percentage("rolloutPercentage", req.rollout_percentage)?;
    Ok(())
}

/// Validate a partial flag update
pub fn validate_flag_update(req: &UpdateFlagRequest) -> Result<(), ValidationError> {
    if let Some(pct) = req.rollout_percentage {
        validate_percentage("rolloutPercentage", pct)?;
    }
    if req.status == Some(FlagStatus::Archived) {
        return Err(ValidationError::ArchiveViaUpdate);
    }
    Ok(())
}

/// Validate an experiment creation request
///
/// # Validation Rules
/// - key is not empty
/// - `trafficPercentage` is 0-100
/// - `confidenceLevel`, when given, lies strictly between 0 and 1
/// - at least one variant, with unique non-empty keys and non-negative weights
/// - weights sum to exactly 100
/// - at least one variant is marked control
pub fn validate_new_experiment(req: &CreateExperimentRequest) -> Result<(), ValidationError> {
    validate_key("experiment", &req.key)?;
    validate_percentage("trafficPercentage", req.traffic_percentage)?;

    if let Some(confidence) = req.confidence_level {
        validate_confidence(confidence)?;
    }

    if req.variants.is_empty() {
        return Err(ValidationError::NoVariants);
    }

    let mut seen = HashSet::new();
    for variant in &req.variants {
        validate_key("variant", &variant.key)?;
        if variant.weight < 0 {
            return Err(ValidationError::NegativeWeight {
                key: variant.key.clone(),
                weight: variant.weight,
            });
        }
        if !seen.insert(variant.key.as_str()) {
            return Err(ValidationError::DuplicateVariantKey(variant.key.clone()));
        }
    }

    let total: i32 = req.variants.iter().map(|v| v.weight).sum();
    if total != 100 {
        return Err(ValidationError::WeightSum(total));
    }

    if !req.variants.iter().any(|v| v.is_control) {
        return Err(ValidationError::NoControl);
    }

    Ok(())
}

pub fn validate_confidence(confidence: f64) -> Result<(), ValidationError> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(ValidationError::ConfidenceOutOfRange(confidence));
    }
    Ok(())
}

/// Validate an event tracking request
pub fn validate_track_event(req: &TrackEventRequest) -> Result<(), ValidationError> {
    validate_key("experiment", &req.experiment_key)?;
    if let Some(value) = req.value {
        if !value.is_finite() {
            return Err(ValidationError::InvalidEventValue(value));
        }
    }
    Ok(())
}

/// Parse the optional RFC3339 expiry of an override request
pub fn parse_expiry(req: &CreateOverrideRequest) -> Result<Option<DateTime<Utc>>, ValidationError> {
    let Some(raw) = req.expires_at.as_deref() else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| ValidationError::InvalidExpiry {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}
