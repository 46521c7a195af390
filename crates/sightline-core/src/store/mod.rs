//! Storage abstraction for Sightline.
//!
//! The [`Store`] trait is the narrow persistence surface the deduplicator,
//! tier manager, and collector share. Backends (in-memory, SQLite, future
//! networked stores) are injected as `Arc<dyn Store>`.
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must give read-your-writes consistency for
//! [`get_by_natural_key`](Store::get_by_natural_key) followed by
//! [`create_record`](Store::create_record) or
//! [`upsert_record`](Store::upsert_record).

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::{Record, Sighting, Tier};

/// Result of an atomic record creation.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// The record and its first sighting were written.
    Created,
    /// Another writer already owns this natural key. Nothing was written.
    Exists(Record),
}

/// Result of a compare-and-set tier update.
#[derive(Debug, Clone, PartialEq)]
pub enum TierUpdate {
    /// The tier matched the expected value and was replaced.
    Applied(Record),
    /// The stored tier differed; the current record is returned unchanged.
    Conflict(Record),
}

/// Filtering primitives for [`Store::iterate_records`].
///
/// Results are ordered by natural key. Pass the last key of a page as
/// `after_natural_key` to fetch the next one.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub tier: Option<Tier>,
    pub min_tier: Option<Tier>,
    pub natural_key_prefix: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub after_natural_key: Option<String>,
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(t) = self.tier {
            if record.tier != t {
                return false;
            }
        }
        if let Some(t) = self.min_tier {
            if record.tier < t {
                return false;
            }
        }
        if let Some(ref p) = self.natural_key_prefix {
            if !record.natural_key.starts_with(p.as_str()) {
                return false;
            }
        }
        if let Some(ts) = self.created_after {
            if record.created_at <= ts {
                return false;
            }
        }
        if let Some(ts) = self.created_before {
            if record.created_at >= ts {
                return false;
            }
        }
        if let Some(ref k) = self.after_natural_key {
            if record.natural_key.as_str() <= k.as_str() {
                return false;
            }
        }
        true
    }
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_by_natural_key`](Store::get_by_natural_key) | Look up the record owning a key |
/// | [`get_record`](Store::get_record) | Look up a record by id |
/// | [`create_record`](Store::create_record) | Atomically insert a record and its first sighting |
/// | [`upsert_record`](Store::upsert_record) | Insert, or refresh content of, a record |
/// | [`update_tier`](Store::update_tier) | Compare-and-set a record's tier |
/// | [`append_sighting`](Store::append_sighting) | Append to the sighting ledger |
/// | [`sightings_for`](Store::sightings_for) | Read the ledger for one key |
/// | [`count_records`](Store::count_records) | Number of records |
/// | [`count_sightings`](Store::count_sightings) | Number of sightings |
/// | [`iterate_records`](Store::iterate_records) | Filtered, keyset-paginated listing |
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_by_natural_key(&self, natural_key: &str) -> StoreResult<Option<Record>>;

    async fn get_record(&self, record_id: &str) -> StoreResult<Option<Record>>;

    /// Insert `record` and `first_sighting` together, or neither.
    ///
    /// If a record with the same natural key already exists, nothing is
    /// written and [`CreateOutcome::Exists`] carries the stored record.
    async fn create_record(
        &self,
        record: &Record,
        first_sighting: &Sighting,
    ) -> StoreResult<CreateOutcome>;

    /// Insert the record, or replace `content`, `content_hash` and
    /// `updated_at` of the record holding the same natural key.
    ///
    /// Never changes `record_id`, `tier` or `created_at` of an existing record.
    async fn upsert_record(&self, record: &Record) -> StoreResult<()>;

    /// Set the tier to `target` only if it currently equals `expected`.
    ///
    /// Returns [`StoreError::NotFound`](crate::error::StoreError::NotFound)
    /// for unknown ids.
    async fn update_tier(
        &self,
        record_id: &str,
        expected: Tier,
        target: Tier,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<TierUpdate>;

    /// Append a sighting. Re-appending a known `sighting_id` is a no-op.
    async fn append_sighting(&self, sighting: &Sighting) -> StoreResult<()>;

    /// All sightings for a key, oldest observation first.
    async fn sightings_for(&self, natural_key: &str) -> StoreResult<Vec<Sighting>>;

    async fn count_records(&self) -> StoreResult<u64>;

    async fn count_sightings(&self) -> StoreResult<u64>;

    async fn iterate_records(&self, filter: &RecordFilter) -> StoreResult<Vec<Record>>;
}
