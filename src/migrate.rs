use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per natural key, ever.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            record_id TEXT PRIMARY KEY,
            natural_key TEXT NOT NULL UNIQUE,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            tier TEXT NOT NULL DEFAULT 'bronze',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only sighting ledger.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sightings (
            sighting_id TEXT PRIMARY KEY,
            natural_key TEXT NOT NULL,
            record_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            observed_at INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            FOREIGN KEY (record_id) REFERENCES records(record_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sightings_natural_key ON sightings(natural_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sightings_source_id ON sightings(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_tier ON records(tier)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_created_at ON records(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
