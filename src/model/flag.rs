use super::context::SegmentRules;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Evaluation strategy of a flag
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    /// Serves the flag's static `enabled` value
    #[default]
    Boolean,
    /// Rolls out to a stable percentage of subjects
    Percentage,
    /// Enabled only for subjects on the allow list
    UserList,
    /// Enabled for subjects matching the segment rules
    Segment,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::Boolean => "boolean",
            FlagType::Percentage => "percentage",
            FlagType::UserList => "user_list",
            FlagType::Segment => "segment",
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlagType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boolean" => Ok(FlagType::Boolean),
            "percentage" => Ok(FlagType::Percentage),
            "user_list" => Ok(FlagType::UserList),
            "segment" => Ok(FlagType::Segment),
            other => Err(format!("unknown flag type '{}'", other)),
        }
    }
}

/// Lifecycle status of a flag
///
/// Only active flags are ever served by evaluation. Archived is terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

impl fmt::Display for FlagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlagStatus::Active => "active",
            FlagStatus::Inactive => "inactive",
            FlagStatus::Archived => "archived",
        })
    }
}

/// A named capability toggle with its evaluation strategy
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Flag {
    pub id: Uuid,

    /// Unique, stable identity used by callers
    pub key: String,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type")]
    pub flag_type: FlagType,

    pub status: FlagStatus,

    /// Static default, served by boolean flags and segment fallbacks
    pub enabled: bool,

    /// 0-100, used by percentage flags
    #[serde(rename = "rolloutPercentage", default)]
    pub rollout_percentage: i32,

    #[serde(rename = "allowedSubjects", default)]
    pub allowed_subjects: BTreeSet<String>,

    #[serde(rename = "blockedSubjects", default)]
    pub blocked_subjects: BTreeSet<String>,

    #[serde(rename = "segmentRules", skip_serializing_if = "Option::is_none")]
    pub segment_rules: Option<SegmentRules>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Flag {
    pub fn is_active(&self) -> bool {
        self.status == FlagStatus::Active
    }
}

/// Per-subject pinned evaluation result
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FlagOverride {
    pub id: Uuid,

    #[serde(rename = "flagId")]
    pub flag_id: Uuid,

    #[serde(rename = "subjectId")]
    pub subject_id: String,

    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl FlagOverride {
    /// An override with no expiry never expires
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Why an evaluation produced its answer
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationSource {
    NotFound,
    Inactive,
    Override,
    Blocked,
    UserList,
    Default,
    NoContext,
    Percentage,
    Segment,
}

impl EvaluationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationSource::NotFound => "not_found",
            EvaluationSource::Inactive => "inactive",
            EvaluationSource::Override => "override",
            EvaluationSource::Blocked => "blocked",
            EvaluationSource::UserList => "user_list",
            EvaluationSource::Default => "default",
            EvaluationSource::NoContext => "no_context",
            EvaluationSource::Percentage => "percentage",
            EvaluationSource::Segment => "segment",
        }
    }
}

impl fmt::Display for EvaluationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one flag for one caller
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EvaluationResult {
    #[serde(rename = "flagKey")]
    pub flag_key: String,
    pub enabled: bool,
    pub source: EvaluationSource,
}

impl EvaluationResult {
    pub fn new(flag_key: impl Into<String>, enabled: bool, source: EvaluationSource) -> Self {
        Self {
            flag_key: flag_key.into(),
            enabled,
            source,
        }
    }
}

/// Admin request to create a flag
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CreateFlagRequest {
    pub key: String,

    #[serde(default)]
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type", default)]
    pub flag_type: FlagType,

    #[serde(default)]
    pub enabled: bool,

    #[serde(rename = "rolloutPercentage", default)]
    pub rollout_percentage: i32,

    #[serde(rename = "allowedSubjects", default)]
    pub allowed_subjects: BTreeSet<String>,

    #[serde(rename = "blockedSubjects", default)]
    pub blocked_subjects: BTreeSet<String>,

    #[serde(rename = "segmentRules", skip_serializing_if = "Option::is_none")]
    pub segment_rules: Option<SegmentRules>,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// Admin partial update of a flag; unset fields are left unchanged
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UpdateFlagRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub flag_type: Option<FlagType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FlagStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(rename = "rolloutPercentage", skip_serializing_if = "Option::is_none")]
    pub rollout_percentage: Option<i32>,

    #[serde(rename = "allowedSubjects", skip_serializing_if = "Option::is_none")]
    pub allowed_subjects: Option<BTreeSet<String>>,

    #[serde(rename = "blockedSubjects", skip_serializing_if = "Option::is_none")]
    pub blocked_subjects: Option<BTreeSet<String>>,

    /// `Some(None)` clears the rules; on the wire that is an explicit `null`
    #[serde(
        rename = "segmentRules",
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub segment_rules: Option<Option<SegmentRules>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Admin request to pin a flag value for one subject
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CreateOverrideRequest {
    #[serde(rename = "subjectId")]
    pub subject_id: String,

    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// RFC3339 timestamp
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Keep a present field distinct from an absent one: absent stays `None`
/// through `default`, while `null` becomes `Some(None)`
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
