//! Data model for flags, overrides, experiments and their derived results
//!
//! These are plain serde types. Persistence belongs to the store
//! collaborators in `engine::store`; evaluation logic lives in `engine`.

pub mod context;
pub mod experiment;
pub mod flag;

pub use context::{SegmentRules, UserContext};
pub use experiment::{
    CreateExperimentRequest, CreateVariantRequest, EventType, Experiment, ExperimentAssignment,
    ExperimentEvent, ExperimentResults, ExperimentStatus, ExperimentWithVariants,
    RecommendedAction, TrackEventRequest, Variant, VariantMetrics, DEFAULT_CONFIDENCE_LEVEL,
    DEFAULT_MIN_SAMPLE_SIZE,
};
pub use flag::{
    CreateFlagRequest, CreateOverrideRequest, EvaluationResult, EvaluationSource, Flag,
    FlagOverride, FlagStatus, FlagType, UpdateFlagRequest,
};

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
