//! Error taxonomy for the collection core.
//!
//! Each component has its own error type so callers can tell retryable
//! storage trouble apart from bad input and from fatal commit failures.

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::Tier;

/// A candidate that can never become a record. Not retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("natural_key is empty")]
    EmptyNaturalKey,

    #[error("natural_key is malformed: {0}")]
    MalformedNaturalKey(String),

    #[error("source_id is empty")]
    EmptySourceId,
}

/// Failure reported by a [`Store`](crate::store::Store) backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend could not be reached or is temporarily busy.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {0}")]
    NotFound(String),

    /// Stored data could not be decoded.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure while committing a prepared candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DedupError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Lookup or sighting append failed; nothing was half-written.
    #[error("transient storage failure: {0}")]
    Transient(StoreError),

    /// Storage failed inside the new-record branch. The run must stop.
    #[error("record commit aborted for '{natural_key}': {source}")]
    CommitAborted {
        natural_key: String,
        source: StoreError,
    },
}

impl DedupError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DedupError::CommitAborted { .. })
    }
}

/// Failure from the tier manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TierError {
    #[error("invalid tier transition for {record_id}: {from} -> {to}")]
    InvalidTransition {
        record_id: String,
        from: Tier,
        to: Tier,
    },

    #[error("actor '{actor}' may not promote records to {to}")]
    NotPermitted { actor: String, to: Tier },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),
}

/// Failure from the collection planner. A failed plan is never partial.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("invalid window: start {start} is after end {end}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },

    #[error("no source can cover {start}..{end}")]
    UncoverableWindow { start: NaiveDate, end: NaiveDate },

    #[error("invalid source '{name}': {reason}")]
    InvalidSource { name: String, reason: String },
}
