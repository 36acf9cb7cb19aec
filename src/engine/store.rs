//! Store collaborators for flags and experiments
//!
//! Follows the same trait-based seam as the rest of the engine:
//! - `FlagStore` / `ExperimentStore` traits for abstraction
//! - `MemoryStore` implementing both, used by the service binary and tests
//!
//! A database-backed store plugs in by implementing the two traits. It must
//! keep the same guarantees as `MemoryStore`: unique keys, override upsert
//! on (flag, subject), expired overrides hidden from lookup, and
//! insert-if-absent assignments.

use crate::engine::analysis::fold_variant_metrics;
use crate::engine::clock::{Clock, SystemClock};
use crate::model::{
    Experiment, ExperimentAssignment, ExperimentEvent, ExperimentStatus, Flag, FlagOverride,
    FlagStatus, Variant, VariantMetrics,
};
use async_trait::async_trait;
use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    Missing(String),
}

/// Persistence of flags and their per-subject overrides
#[async_trait]
pub trait FlagStore: Send + Sync {
    /// All flags with status `active`, used to rebuild the cache snapshot
    async fn list_active_flags(&self) -> Result<Vec<Flag>, StoreError>;

    async fn list_flags(&self) -> Result<Vec<Flag>, StoreError>;

    /// Direct lookup regardless of status
    async fn get_flag_by_key(&self, key: &str) -> Result<Option<Flag>, StoreError>;

    /// Fails with `Conflict` when the key is taken
    async fn insert_flag(&self, flag: Flag) -> Result<(), StoreError>;

    /// Replaces the flag with the same id if its stored status is still
    /// `expected`, otherwise fails with `Conflict`
    ///
    /// Concurrent edits that keep the status unchanged are last-write-wins.
    async fn update_flag(&self, flag: Flag, expected: FlagStatus) -> Result<(), StoreError>;

    /// Override for the subject, excluding expired ones
    async fn get_active_override(
        &self,
        flag_id: Uuid,
        subject_id: &str,
    ) -> Result<Option<FlagOverride>, StoreError>;

    /// Insert or replace the override for (flag, subject)
    async fn upsert_override(&self, ov: FlagOverride) -> Result<FlagOverride, StoreError>;

    /// All overrides of a flag, expired ones included
    async fn list_overrides(&self, flag_id: Uuid) -> Result<Vec<FlagOverride>, StoreError>;

    /// Returns whether an override was removed
    async fn delete_override(&self, flag_id: Uuid, subject_id: &str) -> Result<bool, StoreError>;
}

/// Persistence of experiments, variants, assignments and events
#[async_trait]
pub trait ExperimentStore: Send + Sync {
    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>, StoreError>;

    async fn get_experiment_by_key(&self, key: &str) -> Result<Option<Experiment>, StoreError>;

    async fn list_experiments(
        &self,
        status: Option<ExperimentStatus>,
    ) -> Result<Vec<Experiment>, StoreError>;

    /// Stores the experiment and its variants together; `Conflict` on a taken key
    async fn insert_experiment(
        &self,
        experiment: Experiment,
        variants: Vec<Variant>,
    ) -> Result<(), StoreError>;

    /// Replaces the experiment if its stored status is still `expected`,
    /// otherwise fails with `Conflict`
    async fn update_experiment(
        &self,
        experiment: Experiment,
        expected: ExperimentStatus,
    ) -> Result<(), StoreError>;

    async fn list_variants(&self, experiment_id: Uuid) -> Result<Vec<Variant>, StoreError>;

    async fn get_assignment(
        &self,
        experiment_id: Uuid,
        subject_id: &str,
    ) -> Result<Option<ExperimentAssignment>, StoreError>;

    /// Insert unless (experiment, subject) already has an assignment
    ///
    /// Returns the row that survives, which is the existing one on a race.
    async fn insert_assignment_if_absent(
        &self,
        assignment: ExperimentAssignment,
    ) -> Result<ExperimentAssignment, StoreError>;

    async fn append_event(&self, event: ExperimentEvent) -> Result<(), StoreError>;

    /// Per-variant aggregates of assignments and events
    async fn variant_metrics(&self, experiment_id: Uuid)
        -> Result<Vec<VariantMetrics>, StoreError>;
}

#[derive(Default)]
struct FlagTables {
    flags: HashMap<Uuid, Flag>,
    overrides: HashMap<(Uuid, String), FlagOverride>,
}

#[derive(Default)]
struct ExperimentTables {
    experiments: HashMap<Uuid, Experiment>,
    variants: HashMap<Uuid, Vec<Variant>>,
    assignments: HashMap<(Uuid, String), ExperimentAssignment>,
    events: Vec<ExperimentEvent>,
}

/// In-process store holding everything in memory
///
/// Locks are held only for the duration of a single call, never across
/// an await point.
pub struct MemoryStore {
    flags: RwLock<FlagTables>,
    experiments: RwLock<ExperimentTables>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            flags: RwLock::new(FlagTables::default()),
            experiments: RwLock::new(ExperimentTables::default()),
            clock,
        }
    }

    fn flags_read(&self) -> Result<RwLockReadGuard<'_, FlagTables>, StoreError> {
        self.flags
            .read()
            .map_err(|_| StoreError::Unavailable("flag table lock poisoned".into()))
    }

    fn flags_write(&self) -> Result<RwLockWriteGuard<'_, FlagTables>, StoreError> {
        self.flags
            .write()
            .map_err(|_| StoreError::Unavailable("flag table lock poisoned".into()))
    }

    fn experiments_read(&self) -> Result<RwLockReadGuard<'_, ExperimentTables>, StoreError> {
        self.experiments
            .read()
            .map_err(|_| StoreError::Unavailable("experiment table lock poisoned".into()))
    }

    fn experiments_write(&self) -> Result<RwLockWriteGuard<'_, ExperimentTables>, StoreError> {
        self.experiments
            .write()
            .map_err(|_| StoreError::Unavailable("experiment table lock poisoned".into()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl FlagStore for MemoryStore {
    async fn list_active_flags(&self) -> Result<Vec<Flag>, StoreError> {
        let tables = self.flags_read()?;
        Ok(tables
            .flags
            .values()
            .filter(|f| f.is_active())
            .cloned()
            .collect())
    }

    async fn list_flags(&self) -> Result<Vec<Flag>, StoreError> {
        let tables = self.flags_read()?;
        let mut flags: Vec<Flag> = tables.flags.values().cloned().collect();
        flags.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(flags)
    }

    async fn get_flag_by_key(&self, key: &str) -> Result<Option<Flag>, StoreError> {
        let tables = self.flags_read()?;
        Ok(tables.flags.values().find(|f| f.key == key).cloned())
    }

    async fn insert_flag(&self, flag: Flag) -> Result<(), StoreError> {
        let mut tables = self.flags_write()?;
        if tables.flags.values().any(|f| f.key == flag.key) {
            return Err(StoreError::Conflict(format!(
                "flag key '{}' already exists",
                flag.key
            )));
        }
        tables.flags.insert(flag.id, flag);
        Ok(())
    }

    async fn update_flag(&self, flag: Flag, expected: FlagStatus) -> Result<(), StoreError> {
        let mut tables = self.flags_write()?;
        match tables.flags.get_mut(&flag.id) {
            Some(existing) if existing.status != expected => Err(StoreError::Conflict(format!(
                "flag '{}' is {}, expected {}",
                existing.key, existing.status, expected
            ))),
            Some(existing) => {
                *existing = flag;
                Ok(())
            }
            None => Err(StoreError::Missing(format!("flag {}", flag.id))),
        }
    }

    async fn get_active_override(
        &self,
        flag_id: Uuid,
        subject_id: &str,
    ) -> Result<Option<FlagOverride>, StoreError> {
        let now = self.clock.now();
        let tables = self.flags_read()?;
        Ok(tables
            .overrides
            .get(&(flag_id, subject_id.to_string()))
            .filter(|ov| !ov.is_expired(now))
            .cloned())
    }

    async fn upsert_override(&self, ov: FlagOverride) -> Result<FlagOverride, StoreError> {
        let mut tables = self.flags_write()?;
        if !tables.flags.contains_key(&ov.flag_id) {
            return Err(StoreError::Missing(format!("flag {}", ov.flag_id)));
        }
        tables
            .overrides
            .insert((ov.flag_id, ov.subject_id.clone()), ov.clone());
        Ok(ov)
    }

    async fn list_overrides(&self, flag_id: Uuid) -> Result<Vec<FlagOverride>, StoreError> {
        let tables = self.flags_read()?;
        let mut overrides: Vec<FlagOverride> = tables
            .overrides
            .values()
            .filter(|ov| ov.flag_id == flag_id)
            .cloned()
            .collect();
        overrides.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
        Ok(overrides)
    }

    async fn delete_override(&self, flag_id: Uuid, subject_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.flags_write()?;
        Ok(tables
            .overrides
            .remove(&(flag_id, subject_id.to_string()))
            .is_some())
    }
}

#[async_trait]
impl ExperimentStore for MemoryStore {
    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>, StoreError> {
        let tables = self.experiments_read()?;
        Ok(tables.experiments.get(&id).cloned())
    }

    async fn get_experiment_by_key(&self, key: &str) -> Result<Option<Experiment>, StoreError> {
        let tables = self.experiments_read()?;
        Ok(tables.experiments.values().find(|e| e.key == key).cloned())
    }

    async fn list_experiments(
        &self,
        status: Option<ExperimentStatus>,
    ) -> Result<Vec<Experiment>, StoreError> {
        let tables = self.experiments_read()?;
        let mut experiments: Vec<Experiment> = tables
            .experiments
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        experiments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.key.cmp(&b.key)));
        Ok(experiments)
    }

    async fn insert_experiment(
        &self,
        experiment: Experiment,
        variants: Vec<Variant>,
    ) -> Result<(), StoreError> {
        let mut tables = self.experiments_write()?;
        if tables.experiments.values().any(|e| e.key == experiment.key) {
            return Err(StoreError::Conflict(format!(
                "experiment key '{}' already exists",
                experiment.key
            )));
        }
        tables.variants.insert(experiment.id, variants);
        tables.experiments.insert(experiment.id, experiment);
        Ok(())
    }

    async fn update_experiment(
        &self,
        experiment: Experiment,
        expected: ExperimentStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.experiments_write()?;
        match tables.experiments.get_mut(&experiment.id) {
            Some(existing) if existing.status != expected => {
                Err(StoreError::Conflict(format!(
                    "experiment '{}' is {}, expected {}",
                    existing.key, existing.status, expected
                )))
            }
            Some(existing) => {
                *existing = experiment;
                Ok(())
            }
            None => Err(StoreError::Missing(format!("experiment {}", experiment.id))),
        }
    }

    async fn list_variants(&self, experiment_id: Uuid) -> Result<Vec<Variant>, StoreError> {
        let tables = self.experiments_read()?;
        Ok(tables
            .variants
            .get(&experiment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_assignment(
        &self,
        experiment_id: Uuid,
        subject_id: &str,
    ) -> Result<Option<ExperimentAssignment>, StoreError> {
        let tables = self.experiments_read()?;
        Ok(tables
            .assignments
            .get(&(experiment_id, subject_id.to_string()))
            .cloned())
    }

    async fn insert_assignment_if_absent(
        &self,
        assignment: ExperimentAssignment,
    ) -> Result<ExperimentAssignment, StoreError> {
        let mut tables = self.experiments_write()?;
        let surviving = tables
            .assignments
            .entry((assignment.experiment_id, assignment.subject_id.clone()))
            .or_insert(assignment);
        Ok(surviving.clone())
    }

    async fn append_event(&self, event: ExperimentEvent) -> Result<(), StoreError> {
        let mut tables = self.experiments_write()?;
        tables.events.push(event);
        Ok(())
    }

    async fn variant_metrics(
        &self,
        experiment_id: Uuid,
    ) -> Result<Vec<VariantMetrics>, StoreError> {
        let tables = self.experiments_read()?;
        let variants = tables
            .variants
            .get(&experiment_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let assignments: Vec<&ExperimentAssignment> = tables
            .assignments
            .values()
            .filter(|a| a.experiment_id == experiment_id)
            .collect();
        let events: Vec<&ExperimentEvent> = tables
            .events
            .iter()
            .filter(|e| e.experiment_id == experiment_id)
            .collect();

        Ok(fold_variant_metrics(variants, &assignments, &events))
    }
}

/// Store wrapper for tests: counts calls and can be switched to failing
///
/// Delegates to an inner `MemoryStore`. While `set_failing(true)` is in
/// effect every call returns `StoreError::Unavailable`;
/// `set_failing_reloads(true)` fails only full flag loads.
#[cfg(test)]
pub struct MockStore {
    pub inner: MemoryStore,
    failing: AtomicBool,
    failing_reloads: AtomicBool,
    list_active_calls: AtomicU32,
    get_flag_calls: AtomicU32,
    override_calls: AtomicU32,
}

#[cfg(test)]
impl MockStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: MemoryStore::new(clock),
            failing: AtomicBool::new(false),
            failing_reloads: AtomicBool::new(false),
            list_active_calls: AtomicU32::new(0),
            get_flag_calls: AtomicU32::new(0),
            override_calls: AtomicU32::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, Ordering::SeqCst);
    }

    /// Fail only `list_active_flags`, leaving direct lookups working
    pub fn set_failing_reloads(&self, failing: bool) {
        self.failing_reloads
            .store(failing, Ordering::SeqCst);
    }

    /// Number of full active-flag loads
    pub fn reloads(&self) -> u32 {
        self.list_active_calls
            .load(Ordering::SeqCst)
    }

    /// Number of direct single-flag lookups
    pub fn direct_lookups(&self) -> u32 {
        self.get_flag_calls.load(Ordering::SeqCst)
    }

    pub fn override_lookups(&self) -> u32 {
        self.override_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("mock store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[async_trait]
impl FlagStore for MockStore {
    async fn list_active_flags(&self) -> Result<Vec<Flag>, StoreError> {
        self.list_active_calls
            .fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if self.failing_reloads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mock reload offline".into()));
        }
        self.inner.list_active_flags().await
    }

    async fn list_flags(&self) -> Result<Vec<Flag>, StoreError> {
        self.check()?;
        self.inner.list_flags().await
    }

    async fn get_flag_by_key(&self, key: &str) -> Result<Option<Flag>, StoreError> {
        self.get_flag_calls
            .fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get_flag_by_key(key).await
    }

    async fn insert_flag(&self, flag: Flag) -> Result<(), StoreError> {
        self.check()?;
        self.inner.insert_flag(flag).await
    }

    async fn update_flag(&self, flag: Flag, expected: FlagStatus) -> Result<(), StoreError> {
        self.check()?;
        self.inner.update_flag(flag, expected).await
    }

    async fn get_active_override(
        &self,
        flag_id: Uuid,
        subject_id: &str,
    ) -> Result<Option<FlagOverride>, StoreError> {
        self.override_calls
            .fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get_active_override(flag_id, subject_id).await
    }

    async fn upsert_override(&self, ov: FlagOverride) -> Result<FlagOverride, StoreError> {
        self.check()?;
        self.inner.upsert_override(ov).await
    }

    async fn list_overrides(&self, flag_id: Uuid) -> Result<Vec<FlagOverride>, StoreError> {
        self.check()?;
        self.inner.list_overrides(flag_id).await
    }

    async fn delete_override(&self, flag_id: Uuid, subject_id: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete_override(flag_id, subject_id).await
    }
}

#[cfg(test)]
#[async_trait]
impl ExperimentStore for MockStore {
    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>, StoreError> {
        self.check()?;
        self.inner.get_experiment(id).await
    }

    async fn get_experiment_by_key(&self, key: &str) -> Result<Option<Experiment>, StoreError> {
        self.check()?;
        self.inner.get_experiment_by_key(key).await
    }

    async fn list_experiments(
        &self,
        status: Option<ExperimentStatus>,
    ) -> Result<Vec<Experiment>, StoreError> {
        self.check()?;
        self.inner.list_experiments(status).await
    }

    async fn insert_experiment(
        &self,
        experiment: Experiment,
        variants: Vec<Variant>,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.insert_experiment(experiment, variants).await
    }

    async fn update_experiment(
        &self,
        experiment: Experiment,
        expected: ExperimentStatus,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.update_experiment(experiment, expected).await
    }

    async fn list_variants(&self, experiment_id: Uuid) -> Result<Vec<Variant>, StoreError> {
        self.check()?;
        self.inner.list_variants(experiment_id).await
    }

    async fn get_assignment(
        &self,
        experiment_id: Uuid,
        subject_id: &str,
    ) -> Result<Option<ExperimentAssignment>, StoreError> {
        self.check()?;
        self.inner.get_assignment(experiment_id, subject_id).await
    }

    async fn insert_assignment_if_absent(
        &self,
        assignment: ExperimentAssignment,
    ) -> Result<ExperimentAssignment, StoreError> {
        self.check()?;
        self.inner.insert_assignment_if_absent(assignment).await
    }

    async fn append_event(&self, event: ExperimentEvent) -> Result<(), StoreError> {
        self.check()?;
        self.inner.append_event(event).await
    }

    async fn variant_metrics(
        &self,
        experiment_id: Uuid,
    ) -> Result<Vec<VariantMetrics>, StoreError> {
        self.check()?;
        self.inner.variant_metrics(experiment_id).await
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
