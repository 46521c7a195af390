//! # Sightline Core
//!
//! Shared, runtime-agnostic logic for Sightline: record models, the
//! deduplicator and sighting ledger, the tier manager, the storage
//! abstraction, and the collection strategy planner.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Backends that need them live in the
//! `sightline` app crate.

pub mod dedup;
pub mod error;
pub mod models;
pub mod planner;
pub mod store;
pub mod tier;

pub use dedup::{ContentPolicy, DedupOutcome, Deduplicator, PreparedCandidate};
pub use error::{DedupError, PlanError, StoreError, TierError, ValidationError};
pub use models::{
    Candidate, CollectionResult, FailureKind, FetchTask, Record, Sighting, SourceKind, SyncPlan,
    TaskFailure, Tier,
};
pub use planner::{CalendarUnit, CollectionPlanner, Coverage, SourceSpec};
pub use store::{CreateOutcome, RecordFilter, Store, TierUpdate};
pub use tier::{PromotionGrant, TierManager};
