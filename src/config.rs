//! Configuration parsing and validation.
//!
//! Sightline is configured via a TOML file (default: `./config/sightline.toml`).
//! [`load_config`] reads the file, applies defaults, and rejects settings
//! the collector or planner could not honor.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/sightline.sqlite"
//!
//! [collect]
//! max_concurrent_tasks = 4
//! content_policy = "first_write_wins"
//!
//! [collect.retry]
//! max_attempts = 5
//! base_delay_ms = 100
//! max_delay_ms = 5000
//!
//! [[sources]]
//! name = "quarterly"
//! kind = "bulk_archive"
//! cost_weight = 1
//! coverage = { type = "periodic", unit = "quarter", publication_lag_days = 1 }
//!
//! [[sources]]
//! name = "live"
//! kind = "live_poll"
//! cost_weight = 3
//! coverage = { type = "rolling", depth_items = 400, items_per_day = 100 }
//!
//! [[tiers.grants]]
//! actor = "validator"
//! max_tier = "silver"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sightline_core::planner::{Coverage, SourceSpec};
use sightline_core::{ContentPolicy, PromotionGrant};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub tiers: TiersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectConfig {
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default)]
    pub content_policy: ContentPolicy,
    /// Capacity of the bounded progress channel.
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            content_policy: ContentPolicy::default(),
            progress_capacity: default_progress_capacity(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_max_concurrent_tasks() -> usize {
    4
}
fn default_progress_capacity() -> usize {
    256
}

/// Bounded exponential backoff for transient storage failures.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Times an adapter is invoked for a task whose stream fails to open.
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            fetch_attempts: default_fetch_attempts(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5000
}
fn default_fetch_attempts() -> u32 {
    1
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, … capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TiersConfig {
    /// Empty means promotions are unrestricted.
    #[serde(default)]
    pub grants: Vec<PromotionGrant>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let collect = &config.collect;
    if collect.max_concurrent_tasks == 0 {
        bail!("collect.max_concurrent_tasks must be >= 1");
    }
    if collect.progress_capacity == 0 {
        bail!("collect.progress_capacity must be >= 1");
    }
    if collect.retry.max_attempts == 0 {
        bail!("collect.retry.max_attempts must be >= 1");
    }
    if collect.retry.fetch_attempts == 0 {
        bail!("collect.retry.fetch_attempts must be >= 1");
    }
    if collect.retry.max_delay_ms < collect.retry.base_delay_ms {
        bail!("collect.retry.max_delay_ms must be >= collect.retry.base_delay_ms");
    }

    let mut names = HashSet::new();
    for source in &config.sources {
        if source.name.trim().is_empty() {
            bail!("sources[].name must not be empty");
        }
        if !names.insert(source.name.as_str()) {
            bail!("Duplicate source name: '{}'", source.name);
        }
        if let Coverage::Rolling {
            depth_items,
            items_per_day,
        } = source.coverage
        {
            if items_per_day == 0 || depth_items == 0 {
                bail!(
                    "source '{}': rolling coverage needs depth_items >= 1 and items_per_day >= 1",
                    source.name
                );
            }
        }
    }

    let mut actors = HashSet::new();
    for grant in &config.tiers.grants {
        if !actors.insert(grant.actor.as_str()) {
            bail!("Duplicate tier grant for actor '{}'", grant.actor);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_core::{CalendarUnit, SourceKind, Tier};

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/s.sqlite\"\n").unwrap();
        assert_eq!(config.collect.max_concurrent_tasks, 4);
        assert_eq!(config.collect.content_policy, ContentPolicy::FirstWriteWins);
        assert_eq!(config.collect.retry.max_attempts, 5);
        assert!(config.sources.is_empty());
        assert!(config.tiers.grants.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let config = parse(
            r#"
[db]
path = "./data/s.sqlite"

[collect]
max_concurrent_tasks = 2
content_policy = "last_write_wins"

[collect.retry]
max_attempts = 3
base_delay_ms = 10
max_delay_ms = 40

[[sources]]
name = "quarterly"
kind = "bulk_archive"
cost_weight = 1
coverage = { type = "periodic", unit = "quarter", publication_lag_days = 1, cumulative = true, earliest = "1993-01-01" }

[[sources]]
name = "live"
kind = "live_poll"
priority = 2
coverage = { type = "rolling", depth_items = 400, items_per_day = 100 }

[[tiers.grants]]
actor = "validator"
max_tier = "silver"
"#,
        )
        .unwrap();
        assert_eq!(config.collect.content_policy, ContentPolicy::LastWriteWins);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].kind, SourceKind::BulkArchive);
        assert!(matches!(
            config.sources[0].coverage,
            Coverage::Periodic {
                unit: CalendarUnit::Quarter,
                publication_lag_days: 1,
                cumulative: true,
                earliest: Some(_),
            }
        ));
        assert_eq!(config.sources[1].cost_weight, 1);
        assert_eq!(config.sources[1].priority, 2);
        assert_eq!(config.tiers.grants[0].max_tier, Tier::Silver);
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(parse("[db]\npath = \"x\"\n[collect]\nmax_concurrent_tasks = 0\n").is_err());
        assert!(parse(
            "[db]\npath = \"x\"\n[collect.retry]\nbase_delay_ms = 500\nmax_delay_ms = 100\n"
        )
        .is_err());
        let dup = r#"
[db]
path = "x"
[[sources]]
name = "daily"
kind = "periodic_index"
coverage = { type = "periodic", unit = "day" }
[[sources]]
name = "daily"
kind = "periodic_index"
coverage = { type = "periodic", unit = "day" }
"#;
        assert!(parse(dup).is_err());
        let zero_rate = r#"
[db]
path = "x"
[[sources]]
name = "live"
kind = "live_poll"
coverage = { type = "rolling", depth_items = 10, items_per_day = 0 }
"#;
        assert!(parse(zero_rate).is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 350,
            fetch_attempts: 1,
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(350));
        assert_eq!(retry.delay_for(30), Duration::from_millis(350));
    }
}
