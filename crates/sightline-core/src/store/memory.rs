//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! All state lives behind one `std::sync::RwLock`, so record creation and
//! its first sighting are written under the same guard.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};
use crate::models::{Record, Sighting, Tier};

use super::{CreateOutcome, RecordFilter, Store, TierUpdate};

#[derive(Default)]
struct Inner {
    /// Keyed by natural key; ordered so listings come out sorted.
    records: BTreeMap<String, Record>,
    /// record_id → natural_key
    ids: HashMap<String, String>,
    sightings: Vec<Sighting>,
    sighting_ids: HashSet<String>,
}

impl Inner {
    fn push_sighting(&mut self, sighting: &Sighting) {
        if self.sighting_ids.insert(sighting.sighting_id.clone()) {
            self.sightings.push(sighting.clone());
        }
    }
}

/// In-memory store.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_by_natural_key(&self, natural_key: &str) -> StoreResult<Option<Record>> {
        Ok(self.read()?.records.get(natural_key).cloned())
    }

    async fn get_record(&self, record_id: &str) -> StoreResult<Option<Record>> {
        let inner = self.read()?;
        Ok(inner
            .ids
            .get(record_id)
            .and_then(|key| inner.records.get(key))
            .cloned())
    }

    async fn create_record(
        &self,
        record: &Record,
        first_sighting: &Sighting,
    ) -> StoreResult<CreateOutcome> {
        let mut inner = self.write()?;
        if let Some(existing) = inner.records.get(&record.natural_key) {
            return Ok(CreateOutcome::Exists(existing.clone()));
        }
        inner
            .records
            .insert(record.natural_key.clone(), record.clone());
        inner
            .ids
            .insert(record.record_id.clone(), record.natural_key.clone());
        inner.push_sighting(first_sighting);
        Ok(CreateOutcome::Created)
    }

    async fn upsert_record(&self, record: &Record) -> StoreResult<()> {
        let mut inner = self.write()?;
        match inner.records.get_mut(&record.natural_key) {
            Some(existing) => {
                existing.content = record.content.clone();
                existing.content_hash = record.content_hash.clone();
                existing.updated_at = record.updated_at;
            }
            None => {
                inner
                    .ids
                    .insert(record.record_id.clone(), record.natural_key.clone());
                inner
                    .records
                    .insert(record.natural_key.clone(), record.clone());
            }
        }
        Ok(())
    }

    async fn update_tier(
        &self,
        record_id: &str,
        expected: Tier,
        target: Tier,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<TierUpdate> {
        let mut inner = self.write()?;
        let key = inner
            .ids
            .get(record_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(record_id.to_string()))?;
        let record = inner
            .records
            .get_mut(&key)
            .ok_or_else(|| StoreError::Corrupt(format!("dangling record id {}", record_id)))?;
        if record.tier != expected {
            return Ok(TierUpdate::Conflict(record.clone()));
        }
        record.tier = target;
        record.updated_at = updated_at;
        Ok(TierUpdate::Applied(record.clone()))
    }

    async fn append_sighting(&self, sighting: &Sighting) -> StoreResult<()> {
        self.write()?.push_sighting(sighting);
        Ok(())
    }

    async fn sightings_for(&self, natural_key: &str) -> StoreResult<Vec<Sighting>> {
        let mut found: Vec<Sighting> = self
            .read()?
            .sightings
            .iter()
            .filter(|s| s.natural_key == natural_key)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.observed_at);
        Ok(found)
    }

    async fn count_records(&self) -> StoreResult<u64> {
        Ok(self.read()?.records.len() as u64)
    }

    async fn count_sightings(&self) -> StoreResult<u64> {
        Ok(self.read()?.sightings.len() as u64)
    }

    async fn iterate_records(&self, filter: &RecordFilter) -> StoreResult<Vec<Record>> {
        let inner = self.read()?;
        let matching = inner.records.values().filter(|r| filter.matches(r)).cloned();
        Ok(match filter.limit {
            Some(n) => matching.take(n).collect(),
            None => matching.collect(),
        })
    }
}
