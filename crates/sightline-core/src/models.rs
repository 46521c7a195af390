//! Core data models used throughout Sightline.
//!
//! These types represent the candidates, records, sightings, and planned
//! work units that flow through the collection pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A proposed record produced by an adapter, prior to identity resolution.
///
/// Candidates are ephemeral: they are consumed once by the
/// [`Deduplicator`](crate::dedup::Deduplicator) and then dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Source-defined stable identifier for the logical item.
    pub natural_key: String,
    /// Opaque payload.
    pub content: serde_json::Value,
    /// Adapter that produced this candidate.
    pub source_id: String,
    /// When the item was fetched.
    pub observed_at: DateTime<Utc>,
}

impl Candidate {
    /// Build a candidate observed now.
    pub fn new(
        natural_key: impl Into<String>,
        source_id: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            natural_key: natural_key.into(),
            content,
            source_id: source_id.into(),
            observed_at: Utc::now(),
        }
    }

    /// Override the observation time.
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// Data-quality tier of a record. Tiers only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Raw, as ingested.
    Bronze,
    /// Validated and cleaned.
    Silver,
    /// Enriched and curated.
    Gold,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Bronze, Tier::Silver, Tier::Gold];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bronze" => Ok(Tier::Bronze),
            "silver" => Ok(Tier::Silver),
            "gold" => Ok(Tier::Gold),
            other => Err(format!(
                "unknown tier '{}'. Must be bronze, silver, or gold.",
                other
            )),
        }
    }
}

/// The canonical, deduplicated entity. One per natural key, ever.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub record_id: String,
    pub natural_key: String,
    pub content: serde_json::Value,
    /// SHA-256 of the canonical JSON encoding of `content`.
    pub content_hash: String,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Create the bronze record for the first sighting of a candidate.
    pub fn first_seen(candidate: &Candidate, now: DateTime<Utc>) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            natural_key: candidate.natural_key.clone(),
            content: candidate.content.clone(),
            content_hash: content_hash(&candidate.content),
            tier: Tier::Bronze,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable fact: `natural_key` was observed via `source_id` at `observed_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sighting {
    pub sighting_id: String,
    pub natural_key: String,
    /// Filled in once the owning record is known.
    pub record_id: String,
    pub source_id: String,
    pub observed_at: DateTime<Utc>,
    /// Hash of the payload carried by this observation.
    pub content_hash: String,
}

impl Sighting {
    /// Mint a sighting for a candidate. The record id is bound at commit time.
    pub fn for_candidate(candidate: &Candidate) -> Self {
        Self {
            sighting_id: Uuid::new_v4().to_string(),
            natural_key: candidate.natural_key.clone(),
            record_id: String::new(),
            source_id: candidate.source_id.clone(),
            observed_at: candidate.observed_at,
            content_hash: content_hash(&candidate.content),
        }
    }

    pub(crate) fn bound_to(&self, record_id: &str) -> Self {
        Self {
            record_id: record_id.to_string(),
            ..self.clone()
        }
    }
}

/// Stable SHA-256 hex digest of a JSON payload.
///
/// `serde_json` maps are ordered by key, so equal payloads always encode
/// to the same bytes.
pub fn content_hash(content: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Coverage class of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Large archives published per coarse period (e.g. one per quarter).
    BulkArchive,
    /// Indexes published on a regular cadence (e.g. daily).
    PeriodicIndex,
    /// A rolling feed of the most recent items with shallow history.
    LivePoll,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::BulkArchive => "bulk_archive",
            SourceKind::PeriodicIndex => "periodic_index",
            SourceKind::LivePoll => "live_poll",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of planned work: fetch `[window_start, window_end]` (inclusive)
/// from one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchTask {
    /// Source name; also the adapter lookup key.
    pub source: String,
    pub kind: SourceKind,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    /// Lower runs first when two tasks start on the same day.
    pub priority: i32,
}

impl FetchTask {
    pub fn label(&self) -> String {
        format!("{}:{}..{}", self.source, self.window_start, self.window_end)
    }

    /// Number of days covered (inclusive).
    pub fn days(&self) -> i64 {
        (self.window_end - self.window_start).num_days() + 1
    }
}

/// Ordered list of fetch tasks covering a requested window exactly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncPlan {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    /// Reference date used to decide what sources have published.
    pub as_of: NaiveDate,
    pub tasks: Vec<FetchTask>,
}

impl SyncPlan {
    pub fn fetch_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks_for<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a FetchTask> + 'a {
        self.tasks.iter().filter(move |t| t.source == source)
    }
}

/// Why a fetch task did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The adapter failed to open or continue its stream.
    Adapter,
    /// No adapter is registered for the task's source.
    MissingAdapter,
    /// Storage stayed unavailable after all retries.
    Storage,
    /// The task's worker panicked.
    Panicked,
}

/// A single failed task inside a [`CollectionResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub task: FetchTask,
    pub kind: FailureKind,
    pub message: String,
}

/// Summary of one orchestration run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionResult {
    pub total_fetched: u64,
    pub total_new: u64,
    pub total_duplicates: u64,
    pub total_rejected: u64,
    pub tasks_completed: u64,
    /// Tasks never started because the run was cancelled or halted.
    pub tasks_skipped: u64,
    pub cancelled: bool,
    pub errors: Vec<TaskFailure>,
}

impl CollectionResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tier_order_is_forward() {
        assert!(Tier::Bronze < Tier::Silver);
        assert!(Tier::Silver < Tier::Gold);
        assert_eq!("GOLD".parse::<Tier>().unwrap(), Tier::Gold);
        assert!("platinum".parse::<Tier>().is_err());
    }

    #[test]
    fn content_hash_ignores_key_order() {
        let a = json!({"b": 1, "a": [1, 2]});
        let b: serde_json::Value = serde_json::from_str(r#"{"a":[1,2],"b":1}"#).unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&json!({"a": [2, 1], "b": 1})));
    }

    #[test]
    fn first_seen_record_is_bronze() {
        let c = Candidate::new("X-1", "daily", json!({"title": "t"}));
        let r = Record::first_seen(&c, c.observed_at);
        assert_eq!(r.tier, Tier::Bronze);
        assert_eq!(r.natural_key, "X-1");
        assert_eq!(r.created_at, r.updated_at);
        assert_eq!(r.content_hash, content_hash(&c.content));
    }

    #[test]
    fn task_label_and_days() {
        let t = FetchTask {
            source: "daily".into(),
            kind: SourceKind::PeriodicIndex,
            window_start: NaiveDate::from_ymd_opt(2024, 1, 30).unwrap(),
            window_end: NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(),
            priority: 0,
        };
        assert_eq!(t.label(), "daily:2024-01-30..2024-02-02");
        assert_eq!(t.days(), 4);
    }
}
