//! Flag evaluation
//!
//! Resolution order, first match wins:
//! 1. flag missing from the cache → `not_found`
//! 2. flag not active → `inactive`
//! 3. per-subject override (uncached store lookup) → `override`
//! 4. block list → `blocked`, then allow list → `user_list`
//! 5. the flag type's own strategy
//!
//! Evaluation never fails. A store error while loading the flag reads as
//! `not_found`; one while loading the override skips the override.

use crate::engine::bucketing::in_rollout;
use crate::engine::cache::FlagCache;
use crate::engine::segment;
use crate::engine::store::FlagStore;
use crate::model::{EvaluationResult, EvaluationSource, Flag, FlagStatus, FlagType, UserContext};
use crate::server::SharedMetrics;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct FlagEvaluator {
    cache: Arc<FlagCache>,
    store: Arc<dyn FlagStore>,
    metrics: Option<SharedMetrics>,
}

impl FlagEvaluator {
    pub fn new(cache: Arc<FlagCache>, store: Arc<dyn FlagStore>) -> Self {
        Self {
            cache,
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<SharedMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Decide whether `key` is enabled for the given context
    pub async fn evaluate(&self, key: &str, ctx: Option<&UserContext>) -> EvaluationResult {
        let result = self.resolve(key, ctx).await;

        debug!(
            flag = %key,
            subject = ctx.map(|c| c.subject_id.as_str()).unwrap_or("-"),
            enabled = result.enabled,
            source = %result.source,
            "Flag evaluated"
        );
        if let Some(ref metrics) = self.metrics {
            metrics.record_evaluation(result.source.as_str());
        }

        result
    }

    /// Evaluate several flags for one context
    ///
    /// Keys are evaluated independently and concurrently; duplicates
    /// collapse into one entry.
    pub async fn evaluate_many(
        &self,
        keys: &[String],
        ctx: Option<&UserContext>,
    ) -> HashMap<String, EvaluationResult> {
        let evaluations = keys.iter().map(|key| self.evaluate(key, ctx));
        join_all(evaluations)
            .await
            .into_iter()
            .map(|r| (r.flag_key.clone(), r))
            .collect()
    }

    async fn resolve(&self, key: &str, ctx: Option<&UserContext>) -> EvaluationResult {
        let flag = match self.cache.get(key).await {
            Ok(Some(flag)) => flag,
            Ok(None) => return EvaluationResult::new(key, false, EvaluationSource::NotFound),
            Err(e) => {
                warn!(flag = %key, error = %e, "Flag lookup failed, treating as not found");
                return EvaluationResult::new(key, false, EvaluationSource::NotFound);
            }
        };

        if flag.status != FlagStatus::Active {
            return EvaluationResult::new(key, false, EvaluationSource::Inactive);
        }

        if let Some(ctx) = ctx {
            if let Some(enabled) = self.override_for(&flag, &ctx.subject_id).await {
                return EvaluationResult::new(key, enabled, EvaluationSource::Override);
            }
            if flag.blocked_subjects.contains(&ctx.subject_id) {
                return EvaluationResult::new(key, false, EvaluationSource::Blocked);
            }
            if flag.allowed_subjects.contains(&ctx.subject_id) {
                return EvaluationResult::new(key, true, EvaluationSource::UserList);
            }
        }

        let (enabled, source) = evaluate_type(&flag, ctx);
        EvaluationResult::new(key, enabled, source)
    }

    async fn override_for(&self, flag: &Flag, subject_id: &str) -> Option<bool> {
        match self.store.get_active_override(flag.id, subject_id).await {
            Ok(ov) => ov.map(|ov| ov.enabled),
            Err(e) => {
                warn!(
                    flag = %flag.key,
                    subject = %subject_id,
                    error = %e,
                    "Override lookup failed, ignoring overrides"
                );
                None
            }
        }
    }
}

/// Type-specific strategy, reached once overrides and lists did not decide
fn evaluate_type(flag: &Flag, ctx: Option<&UserContext>) -> (bool, EvaluationSource) {
    match flag.flag_type {
        FlagType::Boolean => (flag.enabled, EvaluationSource::Default),
        FlagType::Percentage => match ctx {
            None => (false, EvaluationSource::NoContext),
            Some(ctx) => (
                in_rollout(&flag.key, &ctx.subject_id, flag.rollout_percentage),
                EvaluationSource::Percentage,
            ),
        },
        // Allow-listed subjects returned earlier
        FlagType::UserList => (false, EvaluationSource::UserList),
        FlagType::Segment => match (ctx, flag.segment_rules.as_ref()) {
            (Some(ctx), Some(rules)) if !rules.is_empty() => {
                (segment::matches(ctx, rules), EvaluationSource::Segment)
            }
            _ => (flag.enabled, EvaluationSource::Default),
        },
    }
}

#[cfg(test)]
#[path = "evaluation_test.rs"]
mod tests;
