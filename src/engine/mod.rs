//! Flag evaluation and experiment assignment engine
//!
//! - `bucketing` / `segment`: pure decision helpers
//! - `cache`: TTL snapshot of active flags
//! - `evaluation` / `assignment`: the read paths, which degrade instead of failing
//! - `lifecycle` / `validation`: admin-side rules
//! - `analysis`: per-variant aggregation and the significance test
//! - `flags` / `experiments`: the façades a transport layer calls
//! - `store`: persistence seam and the in-memory implementation

pub mod analysis;
pub mod assignment;
pub mod bucketing;
pub mod cache;
pub mod clock;
pub mod error;
pub mod evaluation;
pub mod experiments;
pub mod flags;
pub mod lifecycle;
pub mod segment;
pub mod store;
pub mod validation;

#[cfg(test)]
pub mod fixtures;

pub use cache::{FlagCache, DEFAULT_CACHE_TTL};
pub use clock::{Clock, SystemClock};
pub use error::ServiceError;
pub use experiments::ExperimentService;
pub use flags::FlagService;
pub use lifecycle::{ExperimentDefaults, TransitionError};
pub use store::{ExperimentStore, FlagStore, MemoryStore, StoreError};
pub use validation::ValidationError;
