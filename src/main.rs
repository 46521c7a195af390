//! # Sightline CLI (`sightline`)
//!
//! Operator surface for a Sightline database: initialize the schema,
//! preview collection plans, inspect records and their sightings, and
//! promote records between tiers.
//!
//! ## Usage
//!
//! ```bash
//! sightline --config ./config/sightline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sightline init` | Create the SQLite database and run schema migrations |
//! | `sightline plan --start <date> --end <date>` | Show the fetch tasks covering a window |
//! | `sightline stats` | Record, sighting, and tier counts |
//! | `sightline records` | List stored records |
//! | `sightline sightings <natural-key>` | Show every sighting of one record |
//! | `sightline promote <record-id> <tier>` | Move a record forward a tier |
//!
//! Logs go to stderr and honor `RUST_LOG` (default `sightline=info`).

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sightline::config::{self, Config};
use sightline::{
    migrate, stats, CollectionPlanner, RecordFilter, SqliteStore, Store, Tier, TierManager,
};

/// Sightline CLI: exactly-once record ingestion across overlapping feeds.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sightline.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sightline",
    about = "Sightline: exactly-once record ingestion across overlapping feeds",
    version,
    long_about = "Sightline plans which feeds cover a date window, deduplicates fetched \
    records by natural key so each is stored once, keeps a ledger of every sighting, \
    and tracks records through bronze, silver, and gold tiers."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/sightline.toml`.
    #[arg(long, global = true, default_value = "./config/sightline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the records and sightings
    /// tables. Running it again is safe.
    Init,

    /// Show the fetch tasks that would cover a date window.
    ///
    /// Uses the `[[sources]]` table from the config. Fails when some part
    /// of the window is reachable by no source.
    Plan {
        /// First day of the window (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,

        /// Last day of the window, inclusive (YYYY-MM-DD).
        #[arg(long)]
        end: NaiveDate,

        /// Reference date for publication lag and live depth. Defaults to today (UTC).
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Print the plan as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show database statistics.
    Stats,

    /// List stored records ordered by natural key.
    Records {
        /// Only records at exactly this tier.
        #[arg(long)]
        tier: Option<Tier>,

        /// Only records whose natural key starts with this prefix.
        #[arg(long)]
        prefix: Option<String>,

        /// Start after this natural key (for paging).
        #[arg(long)]
        after: Option<String>,

        /// Maximum number of records to print.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show every sighting recorded for a natural key.
    Sightings {
        natural_key: String,
    },

    /// Promote a record to a higher tier.
    Promote {
        record_id: String,

        /// Target tier: `silver` or `gold`.
        tier: Tier,

        /// Actor performing the promotion, checked against `[[tiers.grants]]`.
        #[arg(long, default_value = sightline_core::tier::SYSTEM_ACTOR)]
        actor: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sightline=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Plan {
            start,
            end,
            as_of,
            json,
        } => {
            let as_of = as_of.unwrap_or_else(|| chrono::Utc::now().date_naive());
            let plan = CollectionPlanner::new(as_of).plan(start, end, &cfg.sources)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!(
                    "plan {}..{} (as of {})",
                    plan.window_start, plan.window_end, plan.as_of
                );
                println!(
                    "  {:<20} {:<16} {:<12} {:<12} {:>5}",
                    "SOURCE", "KIND", "START", "END", "DAYS"
                );
                println!("  {}", "-".repeat(70));
                for task in &plan.tasks {
                    println!(
                        "  {:<20} {:<16} {:<12} {:<12} {:>5}",
                        task.source,
                        task.kind.as_str(),
                        task.window_start.to_string(),
                        task.window_end.to_string(),
                        task.days()
                    );
                }
                println!("  fetches: {}", plan.fetch_count());
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Records {
            tier,
            prefix,
            after,
            limit,
        } => {
            let store = SqliteStore::open(&cfg).await?;
            let filter = RecordFilter {
                tier,
                natural_key_prefix: prefix,
                after_natural_key: after,
                limit: Some(limit),
                ..Default::default()
            };
            let records = store.iterate_records(&filter).await?;
            for r in &records {
                println!(
                    "{}  {:<6}  {}  {}",
                    r.record_id,
                    r.tier.as_str(),
                    r.created_at.format("%Y-%m-%d %H:%M:%S"),
                    r.natural_key
                );
            }
            println!("{} record(s)", records.len());
            store.close().await;
        }
        Commands::Sightings { natural_key } => {
            let store = SqliteStore::open(&cfg).await?;
            let record = store
                .get_by_natural_key(&natural_key)
                .await?
                .with_context(|| format!("No record with natural key '{}'", natural_key))?;
            let sightings = store.sightings_for(&natural_key).await?;
            println!("{}  {}  {}", record.natural_key, record.record_id, record.tier);
            for s in &sightings {
                println!(
                    "  {}  {:<20}  {}",
                    s.observed_at.format("%Y-%m-%d %H:%M:%S"),
                    s.source_id,
                    &s.content_hash[..12.min(s.content_hash.len())]
                );
            }
            println!("{} sighting(s)", sightings.len());
            store.close().await;
        }
        Commands::Promote {
            record_id,
            tier,
            actor,
        } => {
            let store = Arc::new(SqliteStore::open(&cfg).await?);
            let record = tier_manager(store.clone(), &cfg)
                .promote_as(&actor, &record_id, tier)
                .await?;
            println!("{} -> {}", record.record_id, record.tier);
            store.close().await;
        }
    }

    Ok(())
}

/// An empty grant table leaves promotions unrestricted.
fn tier_manager(store: Arc<SqliteStore>, cfg: &Config) -> TierManager {
    let manager = TierManager::new(store);
    if cfg.tiers.grants.is_empty() {
        manager
    } else {
        manager.with_grants(cfg.tiers.grants.clone())
    }
}
