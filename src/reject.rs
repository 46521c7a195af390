//! Destinations for candidates that fail validation.

use async_trait::async_trait;
use std::sync::Mutex;

use sightline_core::{Candidate, ValidationError};

/// Receives every candidate the collector refuses to commit.
#[async_trait]
pub trait RejectSink: Send + Sync {
    async fn reject(&self, candidate: Candidate, reason: ValidationError);
}

/// Logs each rejection at `warn` level. The collector's default sink.
pub struct LogRejectSink;

#[async_trait]
impl RejectSink for LogRejectSink {
    async fn reject(&self, candidate: Candidate, reason: ValidationError) {
        tracing::warn!(
            source = %candidate.source_id,
            natural_key = %candidate.natural_key,
            reason = %reason,
            "candidate rejected"
        );
    }
}

/// Keeps rejected candidates in memory for later inspection.
#[derive(Default)]
pub struct MemoryRejectSink {
    rejected: Mutex<Vec<(Candidate, ValidationError)>>,
}

impl MemoryRejectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything rejected so far, in arrival order.
    pub fn rejected(&self) -> Vec<(Candidate, ValidationError)> {
        match self.rejected.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.rejected.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RejectSink for MemoryRejectSink {
    async fn reject(&self, candidate: Candidate, reason: ValidationError) {
        let mut guard = match self.rejected.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push((candidate, reason));
    }
}
