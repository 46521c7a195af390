//! Database statistics and health overview.
//!
//! Summarizes what has been collected: record and sighting counts, the
//! tier distribution, per-source sighting breakdowns, and the keys seen
//! most often. Used by `sightline stats` to confirm that collection runs
//! are landing and that overlapping feeds are being deduplicated.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use sightline_core::Tier;

use crate::config::Config;
use crate::db;

/// Per-source breakdown of the sighting ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub source: String,
    pub sightings: i64,
    /// Distinct natural keys this source has reported.
    pub records: i64,
    /// Latest `observed_at`, microseconds since the epoch.
    pub last_seen_micros: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub records: i64,
    pub sightings: i64,
    pub by_tier: Vec<(Tier, i64)>,
    pub by_source: Vec<SourceStats>,
    /// Keys with more than one sighting, most sighted first.
    pub most_sighted: Vec<(String, i64)>,
}

const MOST_SIGHTED_LIMIT: i64 = 5;

pub async fn gather_stats(pool: &SqlitePool) -> Result<StoreStats> {
    let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(pool)
        .await?;
    let sightings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sightings")
        .fetch_one(pool)
        .await?;

    let tier_rows = sqlx::query("SELECT tier, COUNT(*) AS n FROM records GROUP BY tier")
        .fetch_all(pool)
        .await?;
    let mut by_tier: Vec<(Tier, i64)> = Tier::ALL.iter().map(|t| (*t, 0)).collect();
    for row in &tier_rows {
        let tier: String = row.get("tier");
        let tier: Tier = tier.parse().map_err(anyhow::Error::msg)?;
        if let Some(slot) = by_tier.iter_mut().find(|(t, _)| *t == tier) {
            slot.1 = row.get("n");
        }
    }

    let source_rows = sqlx::query(
        r#"
        SELECT
            source_id,
            COUNT(*) AS sightings,
            COUNT(DISTINCT natural_key) AS records,
            MAX(observed_at) AS last_seen
        FROM sightings
        GROUP BY source_id
        ORDER BY sightings DESC, source_id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    let by_source = source_rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source_id"),
            sightings: row.get("sightings"),
            records: row.get("records"),
            last_seen_micros: row.get("last_seen"),
        })
        .collect();

    let sighted_rows = sqlx::query(
        r#"
        SELECT natural_key, COUNT(*) AS n
        FROM sightings
        GROUP BY natural_key
        HAVING COUNT(*) > 1
        ORDER BY n DESC, natural_key ASC
        LIMIT ?
        "#,
    )
    .bind(MOST_SIGHTED_LIMIT)
    .fetch_all(pool)
    .await?;
    let most_sighted = sighted_rows
        .iter()
        .map(|row| (row.get("natural_key"), row.get("n")))
        .collect();

    Ok(StoreStats {
        records,
        sightings,
        by_tier,
        by_source,
        most_sighted,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = gather_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Sightline: Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Records:     {}", stats.records);
    println!(
        "  Sightings:   {} ({:.2} per record)",
        stats.sightings,
        if stats.records > 0 {
            stats.sightings as f64 / stats.records as f64
        } else {
            0.0
        }
    );
    for (tier, n) in &stats.by_tier {
        println!("    {:<10} {}", tier.as_str(), n);
    }

    if !stats.by_source.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<24} {:>10} {:>8}   {}",
            "SOURCE", "SIGHTINGS", "KEYS", "LAST SEEN"
        );
        println!("  {}", "-".repeat(64));

        for s in &stats.by_source {
            let seen_display = match s.last_seen_micros {
                Some(micros) => format_ts_relative(micros / 1_000_000),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>10} {:>8}   {}",
                s.source, s.sightings, s.records, seen_display
            );
        }
    }

    if !stats.most_sighted.is_empty() {
        println!();
        println!("  Most sighted:");
        for (key, n) in &stats.most_sighted {
            println!("    {:<40} {}", key, n);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp (seconds) as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
