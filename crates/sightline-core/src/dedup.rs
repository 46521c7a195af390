//! Deduplicator and sighting ledger.
//!
//! Turns a [`Candidate`] into either a brand new bronze [`Record`] or an
//! extra [`Sighting`] of an existing one. At most one record is ever
//! created per natural key: the store's atomic
//! [`create_record`](Store::create_record) acts as the unique constraint,
//! and a writer that loses the race falls back to the duplicate branch.
//!
//! ```text
//! candidate ──▶ prepare (validate, mint sighting)
//!                  │
//!                  ▼
//!            get_by_natural_key ──found──▶ append_sighting ──▶ duplicate
//!                  │ missing
//!                  ▼
//!            create_record ──Exists──▶ append_sighting ──▶ duplicate
//!                  │ Created
//!                  ▼
//!                 new
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::error::{DedupError, StoreError, ValidationError};
use crate::models::{Candidate, Record, Sighting};
use crate::store::{CreateOutcome, Store};

/// Longest accepted natural key, in bytes.
pub const MAX_NATURAL_KEY_LEN: usize = 1024;

/// What to do with a duplicate whose content differs from the stored record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPolicy {
    /// Keep the content of the first sighting.
    #[default]
    FirstWriteWins,
    /// Replace stored content with the latest differing payload.
    LastWriteWins,
}

/// Outcome of committing one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupOutcome {
    pub is_new: bool,
    pub record_id: String,
}

/// A validated candidate with its sighting identity already assigned.
///
/// Committing the same prepared candidate twice never produces two
/// sightings, which makes [`Deduplicator::commit`] safe to retry.
#[derive(Debug, Clone)]
pub struct PreparedCandidate {
    candidate: Candidate,
    sighting: Sighting,
}

impl PreparedCandidate {
    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn natural_key(&self) -> &str {
        &self.candidate.natural_key
    }

    pub fn into_candidate(self) -> Candidate {
        self.candidate
    }
}

/// Check a candidate before it is allowed near storage.
pub fn validate_candidate(candidate: &Candidate) -> Result<(), ValidationError> {
    let key = &candidate.natural_key;
    if key.is_empty() {
        return Err(ValidationError::EmptyNaturalKey);
    }
    if key.trim().is_empty() {
        return Err(ValidationError::MalformedNaturalKey(
            "only whitespace".to_string(),
        ));
    }
    if key.trim() != key {
        return Err(ValidationError::MalformedNaturalKey(
            "leading or trailing whitespace".to_string(),
        ));
    }
    if key.chars().any(char::is_control) {
        return Err(ValidationError::MalformedNaturalKey(
            "contains control characters".to_string(),
        ));
    }
    if key.len() > MAX_NATURAL_KEY_LEN {
        return Err(ValidationError::MalformedNaturalKey(format!(
            "longer than {} bytes",
            MAX_NATURAL_KEY_LEN
        )));
    }
    if candidate.source_id.trim().is_empty() {
        return Err(ValidationError::EmptySourceId);
    }
    Ok(())
}

/// Commits candidates against a [`Store`], one record per natural key.
pub struct Deduplicator {
    store: Arc<dyn Store>,
    policy: ContentPolicy,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            policy: ContentPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ContentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ContentPolicy {
        self.policy
    }

    /// Validate and commit in one step.
    pub async fn process(&self, candidate: &Candidate) -> Result<DedupOutcome, DedupError> {
        let prepared = self.prepare(candidate.clone()).map_err(|(_, err)| err)?;
        self.commit(&prepared).await
    }

    /// Validate `candidate` and assign its sighting id.
    ///
    /// A rejected candidate is handed back with the reason so the caller
    /// can route it to a reject sink.
    pub fn prepare(
        &self,
        candidate: Candidate,
    ) -> Result<PreparedCandidate, (Candidate, ValidationError)> {
        if let Err(err) = validate_candidate(&candidate) {
            return Err((candidate, err));
        }
        let sighting = Sighting::for_candidate(&candidate);
        Ok(PreparedCandidate {
            candidate,
            sighting,
        })
    }

    /// Commit a prepared candidate.
    ///
    /// Lookup and sighting failures come back as [`DedupError::Transient`]
    /// and may be retried. A storage failure while creating a new record
    /// is [`DedupError::CommitAborted`]: callers must stop rather than
    /// risk a second record for the key.
    pub async fn commit(&self, prepared: &PreparedCandidate) -> Result<DedupOutcome, DedupError> {
        let key = prepared.natural_key();
        let existing = self
            .store
            .get_by_natural_key(key)
            .await
            .map_err(DedupError::Transient)?;

        if let Some(record) = existing {
            return self.record_duplicate(record, prepared).await;
        }

        let record = Record::first_seen(&prepared.candidate, Utc::now());
        let sighting = prepared.sighting.bound_to(&record.record_id);
        match self.store.create_record(&record, &sighting).await {
            Ok(CreateOutcome::Created) => {
                tracing::debug!(natural_key = %key, record_id = %record.record_id, "new record");
                Ok(DedupOutcome {
                    is_new: true,
                    record_id: record.record_id,
                })
            }
            Ok(CreateOutcome::Exists(winner)) => {
                tracing::debug!(natural_key = %key, "lost create race, recording sighting");
                self.record_duplicate(winner, prepared).await
            }
            Err(source) => Err(DedupError::CommitAborted {
                natural_key: key.to_string(),
                source,
            }),
        }
    }

    async fn record_duplicate(
        &self,
        record: Record,
        prepared: &PreparedCandidate,
    ) -> Result<DedupOutcome, DedupError> {
        let sighting = prepared.sighting.bound_to(&record.record_id);
        self.store
            .append_sighting(&sighting)
            .await
            .map_err(DedupError::Transient)?;

        if self.policy == ContentPolicy::LastWriteWins && sighting.content_hash != record.content_hash
        {
            self.refresh_content(&record, prepared)
                .await
                .map_err(DedupError::Transient)?;
        }

        Ok(DedupOutcome {
            is_new: false,
            record_id: record.record_id,
        })
    }

    async fn refresh_content(
        &self,
        record: &Record,
        prepared: &PreparedCandidate,
    ) -> Result<(), StoreError> {
        let refreshed = Record {
            content: prepared.candidate.content.clone(),
            content_hash: prepared.sighting.content_hash.clone(),
            updated_at: Utc::now(),
            ..record.clone()
        };
        tracing::debug!(natural_key = %record.natural_key, "refreshing content (last write wins)");
        self.store.upsert_record(&refreshed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;
    use crate::store::memory::InMemoryStore;
    use crate::store::{RecordFilter, TierUpdate};
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::json;

    fn dedup_with_store() -> (Deduplicator, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (Deduplicator::new(store.clone()), store)
    }

    #[tokio::test]
    async fn first_write_wins_keeps_first_content() {
        let (dedup, store) = dedup_with_store();
        let first = dedup
            .process(&Candidate::new("X-1", "daily", json!({"v": 1})))
            .await
            .unwrap();
        let second = dedup
            .process(&Candidate::new("X-1", "live", json!({"v": 2})))
            .await
            .unwrap();

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.record_id, second.record_id);
        assert_eq!(store.count_records().await.unwrap(), 1);

        let record = store.get_by_natural_key("X-1").await.unwrap().unwrap();
        assert_eq!(record.content, json!({"v": 1}));
        assert_eq!(record.tier, Tier::Bronze);

        let sightings = store.sightings_for("X-1").await.unwrap();
        assert_eq!(sightings.len(), 2);
        assert!(sightings.iter().all(|s| s.record_id == record.record_id));
        let sources: Vec<_> = sightings.iter().map(|s| s.source_id.as_str()).collect();
        assert!(sources.contains(&"daily") && sources.contains(&"live"));
    }

    #[tokio::test]
    async fn last_write_wins_refreshes_content() {
        let (dedup, store) = dedup_with_store();
        let dedup = dedup.with_policy(ContentPolicy::LastWriteWins);
        dedup
            .process(&Candidate::new("X-1", "daily", json!({"v": 1})))
            .await
            .unwrap();
        dedup
            .process(&Candidate::new("X-1", "daily", json!({"v": 2})))
            .await
            .unwrap();
        let record = store.get_by_natural_key("X-1").await.unwrap().unwrap();
        assert_eq!(record.content, json!({"v": 2}));
        assert!(record.updated_at >= record.created_at);
        assert_eq!(store.count_records().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sighting_keeps_fetch_time() {
        let (dedup, store) = dedup_with_store();
        let at = DateTime::parse_from_rfc3339("2024-02-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        dedup
            .process(&Candidate::new("K", "daily", json!({})).observed_at(at))
            .await
            .unwrap();
        let sightings = store.sightings_for("K").await.unwrap();
        assert_eq!(sightings[0].observed_at, at);
    }

    #[tokio::test]
    async fn concurrent_same_key_creates_one_record() {
        let (dedup, store) = dedup_with_store();
        let dedup = Arc::new(dedup);
        let mut handles = Vec::new();
        for i in 0..32 {
            let dedup = dedup.clone();
            handles.push(tokio::spawn(async move {
                dedup
                    .process(&Candidate::new("SAME", format!("src-{}", i % 3), json!({"i": i})))
                    .await
                    .unwrap()
            }));
        }
        let mut new_count = 0;
        let mut ids = std::collections::HashSet::new();
        for h in handles {
            let outcome = h.await.unwrap();
            if outcome.is_new {
                new_count += 1;
            }
            ids.insert(outcome.record_id);
        }
        assert_eq!(new_count, 1);
        assert_eq!(ids.len(), 1);
        assert_eq!(store.count_records().await.unwrap(), 1);
        assert_eq!(store.sightings_for("SAME").await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn recommitting_prepared_candidate_adds_no_sighting() {
        let (dedup, store) = dedup_with_store();
        let prepared = dedup
            .prepare(Candidate::new("K", "daily", json!({})))
            .unwrap();
        assert!(dedup.commit(&prepared).await.unwrap().is_new);
        assert!(!dedup.commit(&prepared).await.unwrap().is_new);
        assert_eq!(store.count_sightings().await.unwrap(), 1);
    }

    #[test]
    fn validation_rejects_bad_keys() {
        let bad = |key: &str| Candidate::new(key, "s", json!(null));
        assert_eq!(
            validate_candidate(&bad("")),
            Err(ValidationError::EmptyNaturalKey)
        );
        assert!(matches!(
            validate_candidate(&bad("   ")),
            Err(ValidationError::MalformedNaturalKey(_))
        ));
        assert!(matches!(
            validate_candidate(&bad(" X-1")),
            Err(ValidationError::MalformedNaturalKey(_))
        ));
        assert!(matches!(
            validate_candidate(&bad("X\n1")),
            Err(ValidationError::MalformedNaturalKey(_))
        ));
        assert!(matches!(
            validate_candidate(&bad(&"k".repeat(MAX_NATURAL_KEY_LEN + 1))),
            Err(ValidationError::MalformedNaturalKey(_))
        ));
        assert_eq!(
            validate_candidate(&Candidate::new("X-1", " ", json!(null))),
            Err(ValidationError::EmptySourceId)
        );
        assert!(validate_candidate(&bad("X-1")).is_ok());
    }

    #[tokio::test]
    async fn invalid_candidate_never_reaches_store() {
        let (dedup, store) = dedup_with_store();
        let err = dedup
            .process(&Candidate::new("", "daily", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, DedupError::Invalid(ValidationError::EmptyNaturalKey));
        assert_eq!(store.count_records().await.unwrap(), 0);
        assert_eq!(store.count_sightings().await.unwrap(), 0);
    }

    /// Store whose writes fail while reads work.
    struct ReadOnlyStore(InMemoryStore);

    #[async_trait]
    impl Store for ReadOnlyStore {
        async fn get_by_natural_key(&self, k: &str) -> crate::error::StoreResult<Option<Record>> {
            self.0.get_by_natural_key(k).await
        }
        async fn get_record(&self, id: &str) -> crate::error::StoreResult<Option<Record>> {
            self.0.get_record(id).await
        }
        async fn create_record(
            &self,
            _r: &Record,
            _s: &Sighting,
        ) -> crate::error::StoreResult<CreateOutcome> {
            Err(StoreError::Unavailable("disk detached".into()))
        }
        async fn upsert_record(&self, _r: &Record) -> crate::error::StoreResult<()> {
            Err(StoreError::Unavailable("disk detached".into()))
        }
        async fn update_tier(
            &self,
            id: &str,
            e: Tier,
            t: Tier,
            at: DateTime<Utc>,
        ) -> crate::error::StoreResult<TierUpdate> {
            self.0.update_tier(id, e, t, at).await
        }
        async fn append_sighting(&self, _s: &Sighting) -> crate::error::StoreResult<()> {
            Err(StoreError::Unavailable("disk detached".into()))
        }
        async fn sightings_for(&self, k: &str) -> crate::error::StoreResult<Vec<Sighting>> {
            self.0.sightings_for(k).await
        }
        async fn count_records(&self) -> crate::error::StoreResult<u64> {
            self.0.count_records().await
        }
        async fn count_sightings(&self) -> crate::error::StoreResult<u64> {
            self.0.count_sightings().await
        }
        async fn iterate_records(&self, f: &RecordFilter) -> crate::error::StoreResult<Vec<Record>> {
            self.0.iterate_records(f).await
        }
    }

    #[tokio::test]
    async fn storage_failure_in_new_branch_is_fatal() {
        let dedup = Deduplicator::new(Arc::new(ReadOnlyStore(InMemoryStore::new())));
        let err = dedup
            .process(&Candidate::new("K", "daily", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_fatal(), "expected CommitAborted, got {:?}", err);
    }

    #[tokio::test]
    async fn storage_failure_in_duplicate_branch_is_transient() {
        let inner = InMemoryStore::new();
        let c = Candidate::new("K", "daily", json!({}));
        let r = Record::first_seen(&c, c.observed_at);
        inner
            .create_record(&r, &Sighting::for_candidate(&c).bound_to(&r.record_id))
            .await
            .unwrap();
        let dedup = Deduplicator::new(Arc::new(ReadOnlyStore(inner)));
        let err = dedup.process(&c).await.unwrap_err();
        assert!(matches!(err, DedupError::Transient(ref e) if e.is_transient()));
    }
}
