//! # Sightline
//!
//! Multi-feed record ingestion that stores every record exactly once while
//! keeping a ledger of every time it was seen again.
//!
//! Sightline plans which feeds to fetch for a date window, streams
//! candidates from pluggable adapters, deduplicates them by natural key
//! against SQLite, and tracks each record's data-quality tier.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Planner  │──▶│ Collector  │──▶│ Deduplicator │──▶│  SQLite  │
//! │ SyncPlan │   │ + Adapters │   │  + Sightings │   │  Store   │
//! └──────────┘   └─────┬──────┘   └──────────────┘   └────┬─────┘
//!                      │ ProgressEvents                  │
//!                      ▼                                 ▼
//!                 ┌──────────┐                     ┌───────────┐
//!                 │ Reporter │                     │ CLI       │
//!                 │ (stderr) │                     │(sightline)│
//!                 └──────────┘                     └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sightline init                                   # create database
//! sightline plan --start 2024-01-01 --end 2024-06-30
//! sightline stats
//! sightline records --tier bronze --limit 10
//! sightline promote <record-id> silver --actor validator
//! ```
//!
//! Collection runs are driven from code, since adapters are supplied by
//! the embedding application:
//!
//! ```rust,no_run
//! # async fn run(adapters: sightline::adapter::AdapterRegistry) -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use sightline::progress::ProgressMode;
//! use sightline::{CollectionPlanner, Collector, SqliteStore};
//!
//! let config = sightline::config::load_config("./config/sightline.toml".as_ref())?;
//! let store = Arc::new(SqliteStore::open(&config).await?);
//! let today = chrono::Utc::now().date_naive();
//! let plan = CollectionPlanner::new(today).plan(
//!     chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     today,
//!     &config.sources,
//! )?;
//! let (collector, reporter) = Collector::from_config_with_progress(
//!     store,
//!     adapters,
//!     &config,
//!     ProgressMode::default_for_tty(),
//! );
//! let result = collector.collect(&plan).await?;
//! drop(collector);
//! let tally = reporter.await?;
//! println!(
//!     "{} new, {} duplicates ({} tasks reported)",
//!     result.total_new, result.total_duplicates, tally.tasks_completed
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite storage backend |
//! | [`adapter`] | Adapter protocol and registry |
//! | [`reject`] | Sinks for invalid candidates |
//! | [`progress`] | Progress events and reporters |
//! | [`collect`] | Collection orchestration |
//! | [`stats`] | Database statistics |

pub mod adapter;
pub mod collect;
pub mod config;
pub mod db;
pub mod migrate;
pub mod progress;
pub mod reject;
pub mod sqlite_store;
pub mod stats;

pub use collect::{CollectError, CollectSettings, Collector};
pub use sqlite_store::SqliteStore;

pub use sightline_core::{
    CalendarUnit, Candidate, CollectionPlanner, CollectionResult, ContentPolicy, Coverage,
    DedupError, DedupOutcome, Deduplicator, FailureKind, FetchTask, PlanError, PromotionGrant,
    Record, RecordFilter, Sighting, SourceKind, SourceSpec, Store, StoreError, SyncPlan,
    TaskFailure, Tier, TierError, TierManager, ValidationError,
};
