use super::context::SegmentRules;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default minimum per-variant sample size before an experiment may conclude
pub const DEFAULT_MIN_SAMPLE_SIZE: u64 = 100;

/// Default confidence level for significance testing
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Lifecycle status of an experiment
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Created, not yet collecting data
    #[default]
    Draft,
    /// Assigning subjects and collecting events
    Running,
    /// Temporarily not assigning subjects
    Paused,
    /// Ended; results are final
    Completed,
    /// Hidden from active listings; terminal
    Archived,
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Paused => "paused",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Archived => "archived",
        })
    }
}

/// A/B test splitting a subject population across variants
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Experiment {
    pub id: Uuid,

    /// Unique identity used by callers
    pub key: String,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: ExperimentStatus,

    /// 0-100 share of eligible subjects enrolled
    #[serde(rename = "trafficPercentage")]
    pub traffic_percentage: i32,

    #[serde(rename = "segmentRules", skip_serializing_if = "Option::is_none")]
    pub segment_rules: Option<SegmentRules>,

    #[serde(rename = "minSampleSize")]
    pub min_sample_size: u64,

    #[serde(rename = "confidenceLevel")]
    pub confidence_level: f64,

    #[serde(rename = "primaryMetric")]
    pub primary_metric: String,

    #[serde(rename = "secondaryMetrics", default)]
    pub secondary_metrics: Vec<String>,

    #[serde(rename = "startedAt", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(rename = "endedAt", skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// One treatment arm of an experiment
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Variant {
    pub id: Uuid,

    #[serde(rename = "experimentId")]
    pub experiment_id: Uuid,

    /// Unique within the experiment
    pub key: String,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "isControl")]
    pub is_control: bool,

    /// Share of enrolled traffic; all weights of an experiment sum to 100
    pub weight: i32,

    /// Free-form payload handed to the caller with the assignment
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

/// Experiment together with its variants in walk order
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ExperimentWithVariants {
    #[serde(flatten)]
    pub experiment: Experiment,

    pub variants: Vec<Variant>,
}

/// Durable record of which variant a subject was placed into
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ExperimentAssignment {
    pub id: Uuid,

    #[serde(rename = "experimentId")]
    pub experiment_id: Uuid,

    #[serde(rename = "subjectId")]
    pub subject_id: String,

    #[serde(rename = "variantId")]
    pub variant_id: Uuid,

    #[serde(rename = "assignedAt")]
    pub assigned_at: DateTime<Utc>,
}

/// Kind of event tracked against an assignment
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Impression,
    Conversion,
    Click,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Impression => "impression",
            EventType::Conversion => "conversion",
            EventType::Click => "click",
            EventType::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("event type cannot be empty".to_string()),
            "impression" => Ok(EventType::Impression),
            "conversion" => Ok(EventType::Conversion),
            "click" => Ok(EventType::Click),
            other => Ok(EventType::Custom(other.to_string())),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Append-only event tied to an existing assignment
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ExperimentEvent {
    pub id: Uuid,

    #[serde(rename = "experimentId")]
    pub experiment_id: Uuid,

    #[serde(rename = "subjectId")]
    pub subject_id: String,

    #[serde(rename = "variantId")]
    pub variant_id: Uuid,

    #[serde(rename = "eventType")]
    pub event_type: EventType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Aggregate of one variant's assignments and events
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VariantMetrics {
    #[serde(rename = "variantId")]
    pub variant_id: Uuid,

    #[serde(rename = "variantKey")]
    pub variant_key: String,

    #[serde(rename = "isControl")]
    pub is_control: bool,

    #[serde(rename = "sampleSize")]
    pub sample_size: u64,

    pub impressions: u64,

    pub conversions: u64,

    #[serde(rename = "conversionRate")]
    pub conversion_rate: f64,

    #[serde(rename = "averageValue")]
    pub average_value: f64,

    #[serde(rename = "totalValue")]
    pub total_value: f64,
}

/// What the analysis suggests doing with the experiment
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    #[default]
    Continue,
    ConcludeWinner,
    ConcludeNoImprovement,
    InsufficientVariants,
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecommendedAction::Continue => "continue",
            RecommendedAction::ConcludeWinner => "conclude_winner",
            RecommendedAction::ConcludeNoImprovement => "conclude_no_improvement",
            RecommendedAction::InsufficientVariants => "insufficient_variants",
        })
    }
}

/// Significance verdict for an experiment
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ExperimentResults {
    #[serde(rename = "experimentId")]
    pub experiment_id: Uuid,

    #[serde(rename = "experimentKey")]
    pub experiment_key: String,

    pub variants: Vec<VariantMetrics>,

    #[serde(rename = "controlVariant", skip_serializing_if = "Option::is_none")]
    pub control_variant: Option<String>,

    #[serde(rename = "bestVariant", skip_serializing_if = "Option::is_none")]
    pub best_variant: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,

    #[serde(rename = "isSignificant")]
    pub is_significant: bool,

    #[serde(rename = "pValue", skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,

    #[serde(rename = "zScore", skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,

    /// Relative improvement of the best variant over control, in percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uplift: Option<f64>,

    #[serde(rename = "confidenceLevel")]
    pub confidence_level: f64,

    #[serde(rename = "canConclude")]
    pub can_conclude: bool,

    #[serde(rename = "recommendedAction")]
    pub recommended_action: RecommendedAction,
}

/// Variant definition supplied when creating an experiment
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CreateVariantRequest {
    pub key: String,

    #[serde(default)]
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "isControl", default)]
    pub is_control: bool,

    pub weight: i32,

    #[serde(default)]
    pub config: serde_json::Value,
}

/// Admin request to create an experiment in draft
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CreateExperimentRequest {
    pub key: String,

    #[serde(default)]
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "trafficPercentage", default = "default_traffic_percentage")]
    pub traffic_percentage: i32,

    #[serde(rename = "segmentRules", skip_serializing_if = "Option::is_none")]
    pub segment_rules: Option<SegmentRules>,

    /// Falls back to the configured default when unset
    #[serde(rename = "minSampleSize", skip_serializing_if = "Option::is_none")]
    pub min_sample_size: Option<u64>,

    /// Falls back to the configured default when unset
    #[serde(rename = "confidenceLevel", skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<f64>,

    #[serde(rename = "primaryMetric", default)]
    pub primary_metric: String,

    #[serde(rename = "secondaryMetrics", default)]
    pub secondary_metrics: Vec<String>,

    pub variants: Vec<CreateVariantRequest>,
}

fn default_traffic_percentage() -> i32 {
    100
}

/// Caller request to record an event for a subject
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TrackEventRequest {
    #[serde(rename = "experimentKey")]
    pub experiment_key: String,

    #[serde(rename = "eventType")]
    pub event_type: EventType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}
