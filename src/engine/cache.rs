//! Time-boxed snapshot of active flags
//!
//! The cache holds one immutable map of active flags plus the time it was
//! loaded. Reads inside the TTL are served from memory, and a key missing
//! from a fresh snapshot is reported as absent without asking the store.
//! A stale or invalidated snapshot is rebuilt off to the side from
//! `list_active_flags()` and swapped in under the write lock.
//!
//! If the rebuild fails, the read falls back to a direct single-key store
//! lookup instead of serving stale data or failing the caller.

use crate::engine::clock::Clock;
use crate::engine::store::{FlagStore, StoreError};
use crate::model::Flag;
use crate::server::SharedMetrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default snapshot lifetime
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

type FlagMap = Arc<HashMap<String, Flag>>;

struct Snapshot {
    flags: FlagMap,
    loaded_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Snapshot>,
    /// Bumped by every invalidation; a reload started under an older
    /// generation must not install its result
    generation: u64,
}

pub struct FlagCache {
    store: Arc<dyn FlagStore>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    state: RwLock<CacheState>,
    reload_gate: tokio::sync::Mutex<()>,
    metrics: Option<SharedMetrics>,
}

impl FlagCache {
    pub fn new(store: Arc<dyn FlagStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        let ttl =
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self {
            store,
            clock,
            ttl,
            state: RwLock::new(CacheState::default()),
            reload_gate: tokio::sync::Mutex::new(()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<SharedMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Look up an active flag by key
    ///
    /// # Returns
    /// * `Ok(Some(flag))` - Flag found (from the snapshot or the fallback lookup)
    /// * `Ok(None)` - Flag is not active, or does not exist
    /// * `Err(StoreError)` - Reload and the fallback lookup both failed
    pub async fn get(&self, key: &str) -> Result<Option<Flag>, StoreError> {
        if let Some(flags) = self.fresh_snapshot() {
            return Ok(flags.get(key).cloned());
        }

        match self.reload(false).await {
            Ok(flags) => Ok(flags.get(key).cloned()),
            Err(e) => {
                warn!(
                    flag = %key,
                    error = %e,
                    "Flag cache reload failed, falling back to direct lookup"
                );
                self.store.get_flag_by_key(key).await
            }
        }
    }

    /// Force a full reload of the snapshot
    pub async fn refresh(&self) -> Result<(), StoreError> {
        self.reload(true).await.map(|_| ())
    }

    /// Drop the snapshot so the next read reloads
    pub fn invalidate(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.snapshot = None;
        state.generation += 1;
        debug!(generation = state.generation, "Flag cache invalidated");
    }

    /// Number of flags in the current snapshot, if one is loaded
    pub fn snapshot_len(&self) -> Option<usize> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.snapshot.as_ref().map(|s| s.flags.len())
    }

    // The snapshot is only ever replaced whole, so a poisoned lock still
    // guards a consistent value.
    fn fresh_snapshot(&self) -> Option<FlagMap> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let snapshot = state.snapshot.as_ref()?;
        // A snapshot from the future means the clock stepped back
        let age = self.clock.now() - snapshot.loaded_at;
        if age >= chrono::Duration::zero() && age < self.ttl {
            Some(Arc::clone(&snapshot.flags))
        } else {
            None
        }
    }

    async fn reload(&self, force: bool) -> Result<FlagMap, StoreError> {
        // One reload at a time; callers queued behind it reuse its result
        let _gate = self.reload_gate.lock().await;
        if !force {
            if let Some(flags) = self.fresh_snapshot() {
                return Ok(flags);
            }
        }

        let generation = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation;

        let loaded = match self.store.list_active_flags().await {
            Ok(flags) => flags,
            Err(e) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.record_cache_reload(false);
                }
                return Err(e);
            }
        };

        let flags: FlagMap = Arc::new(
            loaded
                .into_iter()
                .filter(Flag::is_active)
                .map(|f| (f.key.clone(), f))
                .collect(),
        );

        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.generation == generation {
                state.snapshot = Some(Snapshot {
                    flags: Arc::clone(&flags),
                    loaded_at: self.clock.now(),
                });
            } else {
                debug!("Flag cache invalidated during reload, discarding snapshot");
            }
        }

        if let Some(ref metrics) = self.metrics {
            metrics.record_cache_reload(true);
        }
        info!(flags = flags.len(), "Flag cache reloaded");

        Ok(flags)
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
