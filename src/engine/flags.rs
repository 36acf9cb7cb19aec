//! Flag administration and evaluation façade
//!
//! Admin writes go straight to the store and then invalidate the cache,
//! so the next evaluation on this instance reloads. Store errors on these
//! paths are returned to the caller. Override writes leave the cache
//! alone because overrides are never cached.

use crate::engine::cache::FlagCache;
use crate::engine::clock::Clock;
use crate::engine::error::ServiceError;
use crate::engine::evaluation::FlagEvaluator;
use crate::engine::store::FlagStore;
use crate::engine::validation::{
    parse_expiry, validate_flag_update, validate_new_flag, ValidationError,
};
use crate::model::{
    CreateFlagRequest, CreateOverrideRequest, EvaluationResult, Flag, FlagOverride, FlagStatus,
    UpdateFlagRequest, UserContext,
};
use crate::server::SharedMetrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub struct FlagService {
    store: Arc<dyn FlagStore>,
    cache: Arc<FlagCache>,
    evaluator: FlagEvaluator,
    clock: Arc<dyn Clock>,
}

impl FlagService {
    pub fn new(
        store: Arc<dyn FlagStore>,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
        metrics: Option<SharedMetrics>,
    ) -> Self {
        let cache = Arc::new(
            FlagCache::new(store.clone(), clock.clone(), cache_ttl).with_metrics(metrics.clone()),
        );
        let evaluator = FlagEvaluator::new(cache.clone(), store.clone()).with_metrics(metrics);
        Self {
            store,
            cache,
            evaluator,
            clock,
        }
    }

    pub fn cache(&self) -> &Arc<FlagCache> {
        &self.cache
    }

    pub async fn evaluate_flag(&self, key: &str, ctx: Option<&UserContext>) -> EvaluationResult {
        self.evaluator.evaluate(key, ctx).await
    }

    pub async fn evaluate_flags(
        &self,
        keys: &[String],
        ctx: Option<&UserContext>,
    ) -> HashMap<String, EvaluationResult> {
        self.evaluator.evaluate_many(keys, ctx).await
    }

    /// Direct store lookup; sees inactive and archived flags
    pub async fn get_flag(&self, key: &str) -> Result<Flag, ServiceError> {
        self.store
            .get_flag_by_key(key)
            .await?
            .ok_or_else(|| ServiceError::not_found("flag", key))
    }

    pub async fn list_flags(&self) -> Result<Vec<Flag>, ServiceError> {
        Ok(self.store.list_flags().await?)
    }

    pub async fn create_flag(&self, req: CreateFlagRequest) -> Result<Flag, ServiceError> {
        validate_new_flag(&req)?;

        let now = self.clock.now();
        let flag = Flag {
            id: Uuid::new_v4(),
            name: if req.name.is_empty() {
                req.key.clone()
            } else {
                req.name
            },
            key: req.key,
            description: req.description,
            flag_type: req.flag_type,
            status: FlagStatus::Active,
            enabled: req.enabled,
            rollout_percentage: req.rollout_percentage,
            allowed_subjects: req.allowed_subjects,
            blocked_subjects: req.blocked_subjects,
            segment_rules: req.segment_rules,
            tags: req.tags,
            created_at: now,
            updated_at: now,
        };

        self.store
            .insert_flag(flag.clone())
            .await
            .map_err(|e| ServiceError::from_insert("flag", &flag.key, e))?;
        self.cache.invalidate();

        info!(flag = %flag.key, flag_type = %flag.flag_type, "Flag created");
        Ok(flag)
    }

    /// Apply the fields set in `req`; archived flags reject updates
    pub async fn update_flag(
        &self,
        key: &str,
        req: UpdateFlagRequest,
    ) -> Result<Flag, ServiceError> {
        validate_flag_update(&req)?;
        let mut flag = self.mutable_flag(key).await?;
        let expected = flag.status;

        if let Some(name) = req.name {
            flag.name = name;
        }
        if let Some(description) = req.description {
            flag.description = Some(description);
        }
        if let Some(flag_type) = req.flag_type {
            flag.flag_type = flag_type;
        }
        if let Some(status) = req.status {
            flag.status = status;
        }
        if let Some(enabled) = req.enabled {
            flag.enabled = enabled;
        }
        if let Some(pct) = req.rollout_percentage {
            flag.rollout_percentage = pct;
        }
        if let Some(allowed) = req.allowed_subjects {
            flag.allowed_subjects = allowed;
        }
        if let Some(blocked) = req.blocked_subjects {
            flag.blocked_subjects = blocked;
        }
        if let Some(rules) = req.segment_rules {
            flag.segment_rules = rules;
        }
        if let Some(tags) = req.tags {
            flag.tags = tags;
        }

        let flag = self.save(flag, expected).await?;
        info!(flag = %flag.key, "Flag updated");
        Ok(flag)
    }

    /// Flip the flag's static `enabled` value
    pub async fn toggle_flag(&self, key: &str) -> Result<Flag, ServiceError> {
        let mut flag = self.mutable_flag(key).await?;
        let expected = flag.status;
        flag.enabled = !flag.enabled;

        let flag = self.save(flag, expected).await?;
        info!(flag = %flag.key, enabled = flag.enabled, "Flag toggled");
        Ok(flag)
    }

    /// Move the flag to the terminal archived status
    pub async fn archive_flag(&self, key: &str) -> Result<Flag, ServiceError> {
        let mut flag = self.mutable_flag(key).await?;
        let expected = flag.status;
        flag.status = FlagStatus::Archived;

        let flag = self.save(flag, expected).await?;
        info!(flag = %flag.key, "Flag archived");
        Ok(flag)
    }

    /// Pin the flag for one subject, replacing any earlier override
    pub async fn create_override(
        &self,
        flag_key: &str,
        req: CreateOverrideRequest,
    ) -> Result<FlagOverride, ServiceError> {
        if req.subject_id.trim().is_empty() {
            return Err(ValidationError::EmptyKey("subject").into());
        }
        let expires_at = parse_expiry(&req)?;
        let flag = self.get_flag(flag_key).await?;

        let ov = self
            .store
            .upsert_override(FlagOverride {
                id: Uuid::new_v4(),
                flag_id: flag.id,
                subject_id: req.subject_id,
                enabled: req.enabled,
                reason: req.reason,
                expires_at,
                created_at: self.clock.now(),
            })
            .await?;

        info!(
            flag = %flag.key,
            subject = %ov.subject_id,
            enabled = ov.enabled,
            "Flag override set"
        );
        Ok(ov)
    }

    /// All overrides of the flag, expired ones included
    pub async fn list_overrides(&self, flag_key: &str) -> Result<Vec<FlagOverride>, ServiceError> {
        let flag = self.get_flag(flag_key).await?;
        Ok(self.store.list_overrides(flag.id).await?)
    }

    pub async fn delete_override(
        &self,
        flag_key: &str,
        subject_id: &str,
    ) -> Result<(), ServiceError> {
        let flag = self.get_flag(flag_key).await?;
        if !self.store.delete_override(flag.id, subject_id).await? {
            return Err(ServiceError::not_found(
                "override",
                format!("{}/{}", flag_key, subject_id),
            ));
        }

        info!(flag = %flag.key, subject = %subject_id, "Flag override removed");
        Ok(())
    }

    async fn mutable_flag(&self, key: &str) -> Result<Flag, ServiceError> {
        let flag = self.get_flag(key).await?;
        if flag.status == FlagStatus::Archived {
            return Err(ValidationError::FlagArchived(flag.key).into());
        }
        Ok(flag)
    }

    /// Persist `flag` unless its status moved away from `expected` since it
    /// was loaded
    async fn save(&self, mut flag: Flag, expected: FlagStatus) -> Result<Flag, ServiceError> {
        flag.updated_at = self.clock.now();
        self.store
            .update_flag(flag.clone(), expected)
            .await
            .map_err(|e| ServiceError::from_update("flag", &flag.key, e))?;
        self.cache.invalidate();
        Ok(flag)
    }
}

#[cfg(test)]
#[path = "flags_test.rs"]
mod tests;
