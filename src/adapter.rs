//! Adapter protocol for external feeds.
//!
//! An [`Adapter`] turns one [`FetchTask`] into a lazy stream of
//! [`Candidate`]s. Sightline never parses source formats itself; whoever
//! embeds the collector registers one adapter per configured source in an
//! [`AdapterRegistry`], keyed by the source name the planner puts on each
//! task.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use futures::stream::{self, StreamExt};
//! use serde_json::json;
//! use sightline::adapter::{Adapter, AdapterError, AdapterRegistry, CandidateStream};
//! use sightline::{Candidate, FetchTask};
//!
//! struct DailyIndex;
//!
//! #[async_trait]
//! impl Adapter for DailyIndex {
//!     fn name(&self) -> &str { "daily" }
//!     fn description(&self) -> &str { "Per-day filing index" }
//!
//!     async fn fetch(&self, task: &FetchTask) -> Result<CandidateStream, AdapterError> {
//!         let day = task.window_start.to_string();
//!         let candidate = Candidate::new(format!("filing-{}", day), "daily", json!({ "day": day }));
//!         Ok(stream::iter(vec![Ok(candidate)]).boxed())
//!     }
//! }
//!
//! let mut adapters = AdapterRegistry::new();
//! adapters.register(Box::new(DailyIndex));
//! assert!(adapters.find("daily").is_some());
//! ```

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::sync::Arc;

use sightline_core::{Candidate, FetchTask};

/// Stream of candidates produced for one fetch task.
pub type CandidateStream = BoxStream<'static, Result<Candidate, AdapterError>>;

/// Failure inside an adapter, either while opening the stream or mid-stream.
///
/// Adapter errors fail only the task that raised them.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A source of candidates for planned fetch tasks.
///
/// `fetch` may be called more than once for the same task when the
/// collector retries a stream that failed to open, so implementations
/// must be restartable.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Source name this adapter serves. Must match a configured source.
    fn name(&self) -> &str;

    /// One-line description, shown in logs.
    fn description(&self) -> &str;

    /// Open a stream of candidates for `task`'s window.
    ///
    /// Candidates should carry `observed_at` stamped at fetch time.
    async fn fetch(&self, task: &FetchTask) -> Result<CandidateStream, AdapterError>;
}

/// Registered adapters keyed by source name.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its [`Adapter::name`]. A later
    /// registration for the same name replaces the earlier one.
    pub fn register(&mut self, adapter: Box<dyn Adapter>) {
        let name = adapter.name().to_string();
        if self.adapters.insert(name.clone(), Arc::from(adapter)).is_some() {
            tracing::warn!(adapter = %name, "replacing previously registered adapter");
        }
    }

    pub fn find(&self, source: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(source).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}
