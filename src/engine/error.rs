use crate::engine::lifecycle::TransitionError;
use crate::engine::store::StoreError;
use crate::engine::validation::ValidationError;
use thiserror::Error;

/// Error returned by the flag and experiment services
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    /// Another admin write changed the record between load and save
    #[error("{kind} {key} was modified concurrently")]
    Conflict { kind: &'static str, key: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        ServiceError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Map a store `Conflict` on insert to a duplicate-key validation error
    pub(crate) fn from_insert(kind: &'static str, key: &str, err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => ServiceError::Validation(ValidationError::DuplicateKey {
                kind,
                key: key.to_string(),
            }),
            other => ServiceError::Store(other),
        }
    }

    /// Map a store `Conflict` on a status-checked update to `Conflict`
    pub(crate) fn from_update(kind: &'static str, key: &str, err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => ServiceError::Conflict {
                kind,
                key: key.to_string(),
            },
            other => ServiceError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_conflict_maps_to_conflict() {
        let err = ServiceError::from_update(
            "experiment",
            "pricing",
            StoreError::Conflict("experiment 'pricing' is completed, expected running".into()),
        );
        assert!(matches!(
            err,
            ServiceError::Conflict {
                kind: "experiment",
                ref key,
            } if key == "pricing"
        ));
        assert_eq!(err.to_string(), "experiment pricing was modified concurrently");
    }

    #[test]
    fn test_update_other_errors_stay_store_errors() {
        let err = ServiceError::from_update("flag", "x", StoreError::Missing("flag x".into()));
        assert!(matches!(err, ServiceError::Store(StoreError::Missing(_))));
    }
}
