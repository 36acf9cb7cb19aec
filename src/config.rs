//! Environment configuration and startup seeding
//!
//! All settings come from `KOKEILU_*` environment variables. Values that do
//! not parse are logged and replaced by their default rather than aborting
//! startup.

use crate::engine::cache::DEFAULT_CACHE_TTL;
use crate::engine::validation::validate_confidence;
use crate::engine::{ExperimentDefaults, ExperimentService, FlagService, ServiceError};
use crate::model::{CreateExperimentRequest, CreateFlagRequest};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_HEALTH_PORT: u16 = 8080;

pub const ENV_CACHE_TTL_SECONDS: &str = "KOKEILU_CACHE_TTL_SECONDS";
pub const ENV_HEALTH_PORT: &str = "KOKEILU_HEALTH_PORT";
pub const ENV_MIN_SAMPLE_SIZE: &str = "KOKEILU_DEFAULT_MIN_SAMPLE_SIZE";
pub const ENV_CONFIDENCE_LEVEL: &str = "KOKEILU_DEFAULT_CONFIDENCE_LEVEL";
pub const ENV_SEED_FILE: &str = "KOKEILU_SEED_FILE";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub cache_ttl_seconds: u64,
    pub health_port: u16,
    pub default_min_sample_size: u64,
    pub default_confidence_level: f64,
    pub seed_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let defaults = ExperimentDefaults::default();
        Self {
            cache_ttl_seconds: DEFAULT_CACHE_TTL.as_secs(),
            health_port: DEFAULT_HEALTH_PORT,
            default_min_sample_size: defaults.min_sample_size,
            default_confidence_level: defaults.confidence_level,
            seed_file: None,
        }
    }
}

impl EngineConfig {
    /// Read configuration from the process environment
    ///
    /// Environment variables:
    /// - KOKEILU_CACHE_TTL_SECONDS: flag cache TTL (default: 30)
    /// - KOKEILU_HEALTH_PORT: health and metrics port (default: 8080)
    /// - KOKEILU_DEFAULT_MIN_SAMPLE_SIZE: per-variant minimum (default: 100)
    /// - KOKEILU_DEFAULT_CONFIDENCE_LEVEL: in (0, 1) (default: 0.95)
    /// - KOKEILU_SEED_FILE: JSON seed document (optional)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let mut default_confidence_level = parse_or(
            &lookup,
            ENV_CONFIDENCE_LEVEL,
            defaults.default_confidence_level,
        );
        if let Err(e) = validate_confidence(default_confidence_level) {
            warn!(
                variable = ENV_CONFIDENCE_LEVEL,
                error = %e,
                "Ignoring configured value, using default"
            );
            default_confidence_level = defaults.default_confidence_level;
        }

        Self {
            cache_ttl_seconds: parse_or(&lookup, ENV_CACHE_TTL_SECONDS, defaults.cache_ttl_seconds),
            health_port: parse_or(&lookup, ENV_HEALTH_PORT, defaults.health_port),
            default_min_sample_size: parse_or(
                &lookup,
                ENV_MIN_SAMPLE_SIZE,
                defaults.default_min_sample_size,
            ),
            default_confidence_level,
            seed_file: lookup(ENV_SEED_FILE)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn experiment_defaults(&self) -> ExperimentDefaults {
        ExperimentDefaults {
            min_sample_size: self.default_min_sample_size,
            confidence_level: self.default_confidence_level,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + Copy,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            warn!(
                variable = name,
                value = %raw,
                error = %e,
                "Unparsable configuration value, using default"
            );
            default
        }
    }
}

/// Flags and experiments created at startup
///
/// ```json
/// {
///   "flags": [{ "key": "dark-mode", "enabled": true }],
///   "experiments": [{ "key": "checkout-copy", "start": true, "variants": [...] }]
/// }
/// ```
#[derive(Deserialize, Clone, Debug, Default)]
pub struct SeedDocument {
    #[serde(default)]
    pub flags: Vec<CreateFlagRequest>,

    #[serde(default)]
    pub experiments: Vec<SeedExperiment>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SeedExperiment {
    #[serde(flatten)]
    pub request: CreateExperimentRequest,

    /// Move the experiment to running right after creation
    #[serde(default)]
    pub start: bool,
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse seed file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to apply seed entry {key}: {source}")]
    Apply { key: String, source: ServiceError },
}

/// Counts of what a seed document created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub flags: usize,
    pub experiments: usize,
    pub started: usize,
}

pub async fn load_seed_file(path: &Path) -> Result<SeedDocument, SeedError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SeedError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&raw).map_err(|source| SeedError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Create every seeded entry through the admin operations
///
/// Stops at the first entry that fails validation or collides with an
/// existing key.
pub async fn apply_seed(
    doc: SeedDocument,
    flags: &FlagService,
    experiments: &ExperimentService,
) -> Result<SeedSummary, SeedError> {
    let mut summary = SeedSummary::default();

    for req in doc.flags {
        let key = req.key.clone();
        flags
            .create_flag(req)
            .await
            .map_err(|source| SeedError::Apply { key, source })?;
        summary.flags += 1;
    }

    for seed in doc.experiments {
        let key = seed.request.key.clone();
        let created = experiments
            .create_experiment(seed.request)
            .await
            .map_err(|source| SeedError::Apply {
                key: key.clone(),
                source,
            })?;
        summary.experiments += 1;

        if seed.start {
            experiments
                .start_experiment(created.experiment.id)
                .await
                .map_err(|source| SeedError::Apply { key, source })?;
            summary.started += 1;
        }
    }

    info!(
        flags = summary.flags,
        experiments = summary.experiments,
        started = summary.started,
        "Seed applied"
    );
    Ok(summary)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
