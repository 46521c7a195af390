//! Collection orchestration.
//!
//! The [`Collector`] runs a [`SyncPlan`] against registered adapters:
//!
//! ```text
//! SyncPlan ──► tasks sorted by (window_start, priority)
//!                  │  JoinSet, at most max_concurrent_tasks at once
//!                  ▼
//!          Adapter::fetch ──► CandidateStream
//!                  │  one candidate at a time
//!                  ▼
//!          Deduplicator::prepare ──► reject sink on ValidationError
//!                  │
//!          Deduplicator::commit (retried while storage is transient)
//!                  │
//!                  ▼
//!          CollectionResult + ProgressEvents
//! ```
//!
//! Adapter failures and exhausted retries fail only their own task. A
//! failed record creation is different: the run halts, in-flight tasks
//! stop before their next candidate, and [`Collector::collect`] returns
//! [`CollectError::FailClosed`] with the partial result.

use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sightline_core::{
    CollectionResult, ContentPolicy, DedupError, DedupOutcome, Deduplicator, FailureKind,
    FetchTask, PreparedCandidate, Store, StoreError, SyncPlan, TaskFailure,
};

use crate::adapter::{Adapter, AdapterError, AdapterRegistry, CandidateStream};
use crate::config::{CollectConfig, Config, RetryConfig};
use crate::progress::{spawn_reporter, ProgressEvent, ProgressMode, ProgressTally};
use crate::reject::{LogRejectSink, RejectSink};

/// Errors that end a whole collection run.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// Storage could not be reached before any task started.
    #[error("storage unreachable: {0}")]
    StorageUnreachable(#[source] StoreError),

    /// A new record could not be committed; the run stopped.
    #[error("collection halted: commit for '{natural_key}' aborted: {source}")]
    FailClosed {
        natural_key: String,
        source: StoreError,
        partial: CollectionResult,
    },
}

/// Concurrency and retry limits for a [`Collector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectSettings {
    pub max_concurrent_tasks: usize,
    pub retry: RetryConfig,
}

impl CollectSettings {
    pub fn from_config(collect: &CollectConfig) -> Self {
        Self {
            max_concurrent_tasks: collect.max_concurrent_tasks,
            retry: collect.retry.clone(),
        }
    }
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self::from_config(&CollectConfig::default())
    }
}

pub struct Collector {
    store: Arc<dyn Store>,
    adapters: AdapterRegistry,
    settings: CollectSettings,
    policy: ContentPolicy,
    reject_sink: Arc<dyn RejectSink>,
    progress: Option<mpsc::Sender<ProgressEvent>>,
}

impl Collector {
    pub fn new(store: Arc<dyn Store>, adapters: AdapterRegistry, settings: CollectSettings) -> Self {
        Self {
            store,
            adapters,
            settings,
            policy: ContentPolicy::default(),
            reject_sink: Arc::new(LogRejectSink),
            progress: None,
        }
    }

    /// Collector with settings and content policy taken from `config`.
    pub fn from_config(store: Arc<dyn Store>, adapters: AdapterRegistry, config: &Config) -> Self {
        Self::new(store, adapters, CollectSettings::from_config(&config.collect))
            .with_content_policy(config.collect.content_policy)
    }

    /// Like [`Collector::from_config`], with progress drained by `mode`'s
    /// reporter through a channel of `collect.progress_capacity` events.
    pub fn from_config_with_progress(
        store: Arc<dyn Store>,
        adapters: AdapterRegistry,
        config: &Config,
        mode: ProgressMode,
    ) -> (Self, JoinHandle<ProgressTally>) {
        Self::from_config(store, adapters, config)
            .with_reporter(config.collect.progress_capacity, mode)
    }

    pub fn with_content_policy(mut self, policy: ContentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_reject_sink(mut self, sink: Arc<dyn RejectSink>) -> Self {
        self.reject_sink = sink;
        self
    }

    /// Publish progress events on `tx`. Sends wait when the channel is full.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Spawn a reporter for `mode` on a channel bounded at `capacity`.
    ///
    /// The returned handle yields the tally once the collector is dropped.
    /// Must be called inside a Tokio runtime.
    pub fn with_reporter(
        self,
        capacity: usize,
        mode: ProgressMode,
    ) -> (Self, JoinHandle<ProgressTally>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = spawn_reporter(rx, mode.reporter());
        (self.with_progress(tx), handle)
    }

    pub fn settings(&self) -> &CollectSettings {
        &self.settings
    }

    pub async fn collect(&self, plan: &SyncPlan) -> Result<CollectionResult, CollectError> {
        self.collect_with_cancel(plan, CancellationToken::new()).await
    }

    /// Run `plan`, stopping early if `cancel` fires.
    ///
    /// Cancellation takes effect between tasks: tasks already running
    /// finish normally and tasks not yet started are counted in
    /// `tasks_skipped`.
    pub async fn collect_with_cancel(
        &self,
        plan: &SyncPlan,
        cancel: CancellationToken,
    ) -> Result<CollectionResult, CollectError> {
        self.store
            .count_records()
            .await
            .map_err(CollectError::StorageUnreachable)?;

        let mut tasks = plan.tasks.clone();
        tasks.sort_by_key(|t| (t.window_start, t.priority));
        let total_tasks = tasks.len();

        info!(
            window_start = %plan.window_start,
            window_end = %plan.window_end,
            tasks = total_tasks,
            max_concurrent = self.settings.max_concurrent_tasks,
            "collection started"
        );

        let halt = CancellationToken::new();
        let ctx = Arc::new(TaskContext {
            dedup: Deduplicator::new(self.store.clone()).with_policy(self.policy),
            adapters: self.adapters.clone(),
            reject_sink: self.reject_sink.clone(),
            progress: self.progress.clone(),
            retry: self.settings.retry.clone(),
            halt: halt.clone(),
        });

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_tasks.max(1)));
        let mut join_set = JoinSet::new();
        let mut tally = RunTally::default();
        let mut in_flight: Vec<Option<(FetchTask, Arc<TaskCounters>)>> = Vec::new();

        for (index, task) in tasks.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                _ = halt.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                tally.result.tasks_skipped = (total_tasks - index) as u64;
                break;
            };

            let counters = Arc::new(TaskCounters::default());
            in_flight.push(Some((task.clone(), counters.clone())));
            let ctx = ctx.clone();
            join_set.spawn(async move {
                let outcome = match AssertUnwindSafe(run_task(&ctx, &counters, &task))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(task = %task.label(), "task panicked");
                        ctx.emit(ProgressEvent::TaskFailed {
                            task: task.label(),
                            kind: FailureKind::Panicked,
                            message: "task panicked".to_string(),
                        })
                        .await;
                        TaskOutcome::panicked()
                    }
                };
                drop(permit);
                (index, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Some((task, counters)) = in_flight.get_mut(index).and_then(Option::take) {
                        tally.absorb(index, task, &counters, outcome);
                    }
                }
                Err(e) => error!(error = %e, "collection task could not be joined"),
            }
        }
        // A task whose join failed never reported; count what it did.
        for (index, slot) in in_flight.iter_mut().enumerate() {
            if let Some((task, counters)) = slot.take() {
                tally.absorb(index, task, &counters, TaskOutcome::panicked());
            }
        }

        let RunTally {
            mut result,
            mut failures,
            fatal,
        } = tally;
        failures.sort_by_key(|(index, _)| *index);
        result.errors = failures.into_iter().map(|(_, f)| f).collect();
        result.cancelled = cancel.is_cancelled();

        if let Some((natural_key, source)) = fatal {
            error!(
                natural_key = %natural_key,
                error = %source,
                new = result.total_new,
                skipped = result.tasks_skipped,
                "collection halted after failed record commit"
            );
            return Err(CollectError::FailClosed {
                natural_key,
                source,
                partial: result,
            });
        }

        info!(
            fetched = result.total_fetched,
            new = result.total_new,
            duplicates = result.total_duplicates,
            rejected = result.total_rejected,
            completed = result.tasks_completed,
            failed = result.errors.len(),
            skipped = result.tasks_skipped,
            cancelled = result.cancelled,
            "collection finished"
        );
        Ok(result)
    }
}

/// Shared state handed to every task worker.
struct TaskContext {
    dedup: Deduplicator,
    adapters: AdapterRegistry,
    reject_sink: Arc<dyn RejectSink>,
    progress: Option<mpsc::Sender<ProgressEvent>>,
    retry: RetryConfig,
    halt: CancellationToken,
}

impl TaskContext {
    async fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event).await;
        }
    }

    async fn open_stream(
        &self,
        adapter: &dyn Adapter,
        task: &FetchTask,
    ) -> Result<CandidateStream, AdapterError> {
        let mut attempt = 1;
        loop {
            match adapter.fetch(task).await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < self.retry.fetch_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        task = %task.label(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "adapter failed to open stream, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn commit_with_retry(
        &self,
        prepared: &PreparedCandidate,
    ) -> Result<DedupOutcome, DedupError> {
        let mut attempt = 1;
        loop {
            match self.dedup.commit(prepared).await {
                Err(DedupError::Transient(e)) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        natural_key = %prepared.natural_key(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient storage failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

enum TaskOutcome {
    Completed,
    Failed { kind: FailureKind, message: String },
    /// Stopped between candidates because another task aborted the run.
    Interrupted,
    Aborted { natural_key: String, source: StoreError },
}

impl TaskOutcome {
    fn failed(kind: FailureKind, message: String) -> Self {
        TaskOutcome::Failed { kind, message }
    }

    fn panicked() -> Self {
        Self::failed(FailureKind::Panicked, "task panicked".to_string())
    }
}

/// Per-task counts, updated as candidates are processed so they survive
/// a panic partway through the stream.
#[derive(Default)]
struct TaskCounters {
    fetched: AtomicU64,
    new: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
}

impl TaskCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn fetched(&self) -> u64 {
        self.fetched.load(Ordering::Relaxed)
    }

    fn new(&self) -> u64 {
        self.new.load(Ordering::Relaxed)
    }

    fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Run-level totals folded in from finished tasks.
#[derive(Default)]
struct RunTally {
    result: CollectionResult,
    failures: Vec<(usize, TaskFailure)>,
    fatal: Option<(String, StoreError)>,
}

impl RunTally {
    fn absorb(&mut self, index: usize, task: FetchTask, counters: &TaskCounters, outcome: TaskOutcome) {
        self.result.total_fetched += counters.fetched();
        self.result.total_new += counters.new();
        self.result.total_duplicates += counters.duplicates();
        self.result.total_rejected += counters.rejected();
        match outcome {
            TaskOutcome::Completed => self.result.tasks_completed += 1,
            TaskOutcome::Failed { kind, message } => {
                self.failures.push((index, TaskFailure { task, kind, message }))
            }
            TaskOutcome::Interrupted => {}
            TaskOutcome::Aborted {
                natural_key,
                source,
            } => {
                if self.fatal.is_none() {
                    self.fatal = Some((natural_key, source));
                }
            }
        }
    }
}

async fn run_task(ctx: &TaskContext, counters: &TaskCounters, task: &FetchTask) -> TaskOutcome {
    let label = task.label();
    info!(task = %label, kind = task.kind.as_str(), "task started");
    ctx.emit(ProgressEvent::TaskStarted {
        task: label.clone(),
        source: task.source.clone(),
    })
    .await;

    let outcome = match ctx.adapters.find(&task.source) {
        None => {
            let message = format!("no adapter registered for source '{}'", task.source);
            TaskOutcome::failed(FailureKind::MissingAdapter, message)
        }
        Some(adapter) => {
            let opened = ctx.open_stream(adapter.as_ref(), task).await;
            match opened {
                Err(e) => TaskOutcome::failed(FailureKind::Adapter, e.to_string()),
                Ok(stream) => drain(ctx, counters, stream).await,
            }
        }
    };

    match &outcome {
        TaskOutcome::Completed => {
            info!(
                task = %label,
                fetched = counters.fetched(),
                new = counters.new(),
                duplicates = counters.duplicates(),
                rejected = counters.rejected(),
                "task completed"
            );
            ctx.emit(ProgressEvent::TaskCompleted {
                task: label,
                fetched: counters.fetched(),
                new: counters.new(),
                duplicates: counters.duplicates(),
                rejected: counters.rejected(),
            })
            .await;
        }
        TaskOutcome::Failed { kind, message } => {
            warn!(task = %label, kind = ?kind, error = %message, "task failed");
            ctx.emit(ProgressEvent::TaskFailed {
                task: label,
                kind: *kind,
                message: message.clone(),
            })
            .await;
        }
        TaskOutcome::Interrupted => {
            warn!(task = %label, fetched = counters.fetched(), "task interrupted by halt");
        }
        TaskOutcome::Aborted { natural_key, .. } => {
            error!(task = %label, natural_key = %natural_key, "record commit aborted");
        }
    }
    outcome
}

async fn drain(ctx: &TaskContext, counters: &TaskCounters, mut stream: CandidateStream) -> TaskOutcome {
    while let Some(item) = stream.next().await {
        if ctx.halt.is_cancelled() {
            return TaskOutcome::Interrupted;
        }

        let candidate = match item {
            Ok(candidate) => candidate,
            Err(e) => return TaskOutcome::failed(FailureKind::Adapter, e.to_string()),
        };
        TaskCounters::bump(&counters.fetched);
        let source = candidate.source_id.clone();

        let prepared = match ctx.dedup.prepare(candidate) {
            Ok(prepared) => prepared,
            Err((candidate, reason)) => {
                debug!(natural_key = %candidate.natural_key, reason = %reason, "rejecting candidate");
                TaskCounters::bump(&counters.rejected);
                ctx.reject_sink.reject(candidate, reason).await;
                continue;
            }
        };

        let committed = ctx.commit_with_retry(&prepared).await;
        match committed {
            Ok(outcome) => {
                let natural_key = prepared.natural_key().to_string();
                let event = if outcome.is_new {
                    TaskCounters::bump(&counters.new);
                    ProgressEvent::RecordNew {
                        source,
                        natural_key,
                        record_id: outcome.record_id,
                    }
                } else {
                    TaskCounters::bump(&counters.duplicates);
                    ProgressEvent::RecordDuplicate {
                        source,
                        natural_key,
                        record_id: outcome.record_id,
                    }
                };
                ctx.emit(event).await;
            }
            Err(DedupError::Transient(e)) => {
                let message = format!(
                    "storage unavailable after {} attempts for '{}': {}",
                    ctx.retry.max_attempts,
                    prepared.natural_key(),
                    e
                );
                return TaskOutcome::failed(FailureKind::Storage, message);
            }
            Err(DedupError::CommitAborted {
                natural_key,
                source,
            }) => {
                ctx.halt.cancel();
                return TaskOutcome::Aborted {
                    natural_key,
                    source,
                };
            }
            Err(DedupError::Invalid(reason)) => {
                TaskCounters::bump(&counters.rejected);
                ctx.reject_sink.reject(prepared.into_candidate(), reason).await;
            }
        }
    }
    TaskOutcome::Completed
}
