//! SQLite-backed [`Store`] implementation.
//!
//! Records and sightings live in two tables (see [`migrate`](crate::migrate)).
//! The `UNIQUE(natural_key)` constraint on `records` is what enforces
//! one record per key across concurrent writers: [`Store::create_record`]
//! inserts with `ON CONFLICT DO NOTHING` inside a transaction and only
//! writes the first sighting when the insert actually happened.
//!
//! Timestamps are stored as microseconds since the Unix epoch.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use sightline_core::error::StoreResult;
use sightline_core::models::{Record, Sighting, Tier};
use sightline_core::store::{CreateOutcome, RecordFilter, Store, TierUpdate};
use sightline_core::StoreError;

use crate::config::Config;
use crate::db::{self, map_sqlx_error};
use crate::migrate;

const RECORD_COLUMNS: &str =
    "record_id, natural_key, content, content_hash, tier, created_at, updated_at";
const SIGHTING_COLUMNS: &str =
    "sighting_id, natural_key, record_id, source_id, observed_at, content_hash";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(v: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(v)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", v)))
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column).map_err(map_sqlx_error)
}

fn row_to_record(row: &SqliteRow) -> StoreResult<Record> {
    let content: String = get(row, "content")?;
    let tier: String = get(row, "tier")?;
    Ok(Record {
        record_id: get(row, "record_id")?,
        natural_key: get(row, "natural_key")?,
        content: serde_json::from_str(&content)
            .map_err(|e| StoreError::Corrupt(format!("record content: {}", e)))?,
        content_hash: get(row, "content_hash")?,
        tier: tier.parse::<Tier>().map_err(StoreError::Corrupt)?,
        created_at: from_micros(get(row, "created_at")?)?,
        updated_at: from_micros(get(row, "updated_at")?)?,
    })
}

fn row_to_sighting(row: &SqliteRow) -> StoreResult<Sighting> {
    Ok(Sighting {
        sighting_id: get(row, "sighting_id")?,
        natural_key: get(row, "natural_key")?,
        record_id: get(row, "record_id")?,
        source_id: get(row, "source_id")?,
        observed_at: from_micros(get(row, "observed_at")?)?,
        content_hash: get(row, "content_hash")?,
    })
}

fn encode_content(record: &Record) -> StoreResult<String> {
    serde_json::to_string(&record.content)
        .map_err(|e| StoreError::Backend(format!("encode content: {}", e)))
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_by_natural_key(&self, natural_key: &str) -> StoreResult<Option<Record>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM records WHERE natural_key = ?",
            RECORD_COLUMNS
        ))
        .bind(natural_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn get_record(&self, record_id: &str) -> StoreResult<Option<Record>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM records WHERE record_id = ?",
            RECORD_COLUMNS
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn create_record(
        &self,
        record: &Record,
        first_sighting: &Sighting,
    ) -> StoreResult<CreateOutcome> {
        let content = encode_content(record)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO records (record_id, natural_key, content, content_hash, tier, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(natural_key) DO NOTHING
            "#,
        )
        .bind(&record.record_id)
        .bind(&record.natural_key)
        .bind(&content)
        .bind(&record.content_hash)
        .bind(record.tier.as_str())
        .bind(to_micros(record.created_at))
        .bind(to_micros(record.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            let existing = self
                .get_by_natural_key(&record.natural_key)
                .await?
                .ok_or_else(|| {
                    StoreError::Backend(format!(
                        "conflicting record for '{}' not readable",
                        record.natural_key
                    ))
                })?;
            return Ok(CreateOutcome::Exists(existing));
        }

        sqlx::query(
            r#"
            INSERT INTO sightings (sighting_id, natural_key, record_id, source_id, observed_at, content_hash)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(sighting_id) DO NOTHING
            "#,
        )
        .bind(&first_sighting.sighting_id)
        .bind(&first_sighting.natural_key)
        .bind(&record.record_id)
        .bind(&first_sighting.source_id)
        .bind(to_micros(first_sighting.observed_at))
        .bind(&first_sighting.content_hash)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(CreateOutcome::Created)
    }

    async fn upsert_record(&self, record: &Record) -> StoreResult<()> {
        let content = encode_content(record)?;
        sqlx::query(
            r#"
            INSERT INTO records (record_id, natural_key, content, content_hash, tier, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(natural_key) DO UPDATE SET
                content = excluded.content,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.record_id)
        .bind(&record.natural_key)
        .bind(&content)
        .bind(&record.content_hash)
        .bind(record.tier.as_str())
        .bind(to_micros(record.created_at))
        .bind(to_micros(record.updated_at))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update_tier(
        &self,
        record_id: &str,
        expected: Tier,
        target: Tier,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<TierUpdate> {
        let changed = sqlx::query(
            "UPDATE records SET tier = ?, updated_at = ? WHERE record_id = ? AND tier = ?",
        )
        .bind(target.as_str())
        .bind(to_micros(updated_at))
        .bind(record_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        let current = self
            .get_record(record_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(record_id.to_string()))?;
        if changed == 0 {
            Ok(TierUpdate::Conflict(current))
        } else {
            Ok(TierUpdate::Applied(current))
        }
    }

    async fn append_sighting(&self, sighting: &Sighting) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sightings (sighting_id, natural_key, record_id, source_id, observed_at, content_hash)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(sighting_id) DO NOTHING
            "#,
        )
        .bind(&sighting.sighting_id)
        .bind(&sighting.natural_key)
        .bind(&sighting.record_id)
        .bind(&sighting.source_id)
        .bind(to_micros(sighting.observed_at))
        .bind(&sighting.content_hash)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn sightings_for(&self, natural_key: &str) -> StoreResult<Vec<Sighting>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sightings WHERE natural_key = ? ORDER BY observed_at ASC, sighting_id ASC",
            SIGHTING_COLUMNS
        ))
        .bind(natural_key)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_sighting).collect()
    }

    async fn count_records(&self) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(n as u64)
    }

    async fn count_sightings(&self) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sightings")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(n as u64)
    }

    async fn iterate_records(&self, filter: &RecordFilter) -> StoreResult<Vec<Record>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM records WHERE 1 = 1",
            RECORD_COLUMNS
        ));

        if let Some(tier) = filter.tier {
            qb.push(" AND tier = ").push_bind(tier.as_str());
        }
        if let Some(min) = filter.min_tier {
            qb.push(" AND tier IN (");
            let mut allowed = qb.separated(", ");
            for tier in Tier::ALL.iter().filter(|t| **t >= min) {
                allowed.push_bind(tier.as_str());
            }
            allowed.push_unseparated(")");
        }
        if let Some(ref prefix) = filter.natural_key_prefix {
            qb.push(" AND substr(natural_key, 1, ")
                .push_bind(prefix.chars().count() as i64)
                .push(") = ")
                .push_bind(prefix.clone());
        }
        if let Some(ts) = filter.created_after {
            qb.push(" AND created_at > ").push_bind(to_micros(ts));
        }
        if let Some(ts) = filter.created_before {
            qb.push(" AND created_at < ").push_bind(to_micros(ts));
        }
        if let Some(ref key) = filter.after_natural_key {
            qb.push(" AND natural_key > ").push_bind(key.clone());
        }
        qb.push(" ORDER BY natural_key ASC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_record).collect()
    }
}
