//! Streaming reconciliation pipeline.
//!
//! A single coordinator pulls candidate chunks in keyset order, fans each
//! chunk out to spawned workers bounded by a semaphore, and folds their
//! outcomes into a [`RunState`] it alone owns. Workers report through an
//! mpsc channel and never touch shared counters. Per-item failures go to
//! the failure store; only a failed chunk fetch aborts the run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::reconciliation::matcher::{Candidate, CandidateCursor, CandidateQuery};
use crate::reconciliation::orchestrator::{ReconcileOutcome, Reconciler};
use crate::reconciliation::records::*;
use crate::traits::*;
use crate::types::*;

pub const STREAM_RECONCILE: &str = "stream_reconcile";
pub const RETRY_FAILED: &str = "retry_failed";

/// Estimates memory held by the pipeline after a chunk is dispatched
pub trait MemoryProbe: Send + Sync {
    fn estimated_usage(&self, chunk_bytes: usize) -> usize;
}

/// Reports the estimated footprint of the last dispatched chunk
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkFootprintProbe;

impl MemoryProbe for ChunkFootprintProbe {
    fn estimated_usage(&self, chunk_bytes: usize) -> usize {
        chunk_bytes
    }
}

/// Summary returned by every run, including failed and cancelled ones
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: BatchStatus,
    pub total_processed: usize,
    pub total_successful: usize,
    pub total_failed: usize,
    pub duration: Duration,
    pub failure_categories: BTreeMap<ErrorCategory, usize>,
    pub backpressure_pauses: usize,
    pub cancelled: bool,
    /// Set when the run was aborted
    pub error: Option<String>,
}

/// Coordinator-owned state of one run
#[derive(Debug)]
pub struct RunState {
    run: BatchRun,
    started: Instant,
    backpressure_pauses: usize,
    cancelled: bool,
    error: Option<String>,
}

impl RunState {
    fn new(run: BatchRun) -> Self {
        Self {
            run,
            started: Instant::now(),
            backpressure_pauses: 0,
            cancelled: false,
            error: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run.id
    }

    pub fn counters(&self) -> &RunCounters {
        &self.run.counters
    }

    fn record_success(&mut self) {
        self.run.counters.processed += 1;
        self.run.counters.successful += 1;
    }

    fn record_failure(&mut self, category: ErrorCategory) {
        self.run.counters.processed += 1;
        self.run.counters.failed += 1;
        *self.run.failure_categories.entry(category).or_insert(0) += 1;
    }

    fn abort(&mut self, error: &LedgerError) {
        self.error = Some(error.to_string());
    }

    fn finish(mut self) -> (BatchRun, RunResult) {
        self.run.total = self.run.counters.processed;
        self.run.status = if self.error.is_some() || self.cancelled {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        self.run.finished_at = Some(chrono::Utc::now().naive_utc());
        self.run.error_message = match (&self.error, self.cancelled) {
            (Some(error), _) => Some(error.clone()),
            (None, true) => Some(LedgerError::Cancelled.to_string()),
            (None, false) => None,
        };

        let result = RunResult {
            run_id: self.run.id,
            status: self.run.status,
            total_processed: self.run.counters.processed,
            total_successful: self.run.counters.successful,
            total_failed: self.run.counters.failed,
            duration: self.started.elapsed(),
            failure_categories: self.run.failure_categories.clone(),
            backpressure_pauses: self.backpressure_pauses,
            cancelled: self.cancelled,
            error: self.error,
        };
        (self.run, result)
    }
}

/// One unit of work handed to a worker
#[derive(Debug, Clone)]
enum WorkItem {
    Candidate(Candidate),
    /// Re-run of earlier failures for one order
    Retry {
        purchase_id: Uuid,
        order_code: String,
        failure_ids: Vec<Uuid>,
    },
}

impl WorkItem {
    fn purchase_id(&self) -> Uuid {
        match self {
            WorkItem::Candidate(candidate) => candidate.purchase.id,
            WorkItem::Retry { purchase_id, .. } => *purchase_id,
        }
    }

    fn order_code(&self) -> &str {
        match self {
            WorkItem::Candidate(candidate) => &candidate.purchase.order_code,
            WorkItem::Retry { order_code, .. } => order_code,
        }
    }

    fn context(&self, process_type: &str) -> HashMap<String, String> {
        let mut context = HashMap::new();
        context.insert("process_type".to_string(), process_type.to_string());
        match self {
            WorkItem::Candidate(candidate) => {
                context.insert("match_status".to_string(), candidate.status().to_string());
                context.insert("purchase_status".to_string(), candidate.purchase.status.clone());
            }
            WorkItem::Retry { failure_ids, .. } => {
                context.insert("retry_of".to_string(), failure_ids.len().to_string());
            }
        }
        context
    }

    async fn execute<S: LedgerStorage>(&self, reconciler: &Reconciler<S>) -> LedgerResult<ReconcileOutcome> {
        match self {
            WorkItem::Candidate(candidate) => reconciler.reconcile_candidate(candidate).await,
            WorkItem::Retry { order_code, .. } => {
                let candidate = reconciler.engine().classify_order(order_code).await?;
                reconciler.reconcile_candidate(&candidate).await
            }
        }
    }
}

pub struct StreamProcessor<S: LedgerStorage> {
    reconciler: Reconciler<S>,
    failures: Arc<dyn FailureStore>,
    runs: Arc<dyn BatchRunStore>,
    probe: Arc<dyn MemoryProbe>,
    memory_released: Arc<Notify>,
}

impl<S: LedgerStorage + 'static> StreamProcessor<S> {
    pub fn new(reconciler: Reconciler<S>, failures: Arc<dyn FailureStore>, runs: Arc<dyn BatchRunStore>) -> Self {
        Self {
            reconciler,
            failures,
            runs,
            probe: Arc::new(ChunkFootprintProbe),
            memory_released: Arc::new(Notify::new()),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Released-memory signal; `notify_one` ends a back-pressure pause early
    pub fn memory_released(&self) -> Arc<Notify> {
        self.memory_released.clone()
    }

    /// Reconcile every open candidate of `shop` in chunks.
    ///
    /// Returns a summary for completed, aborted and cancelled runs alike.
    /// `Err` is reserved for failures to create or finalize the batch run.
    pub async fn stream_reconcile_all(
        &self,
        shop: &str,
        config: &StreamConfig,
        cancel: CancellationToken,
    ) -> LedgerResult<RunResult> {
        config.validate()?;
        let mut state = self.start_run(STREAM_RECONCILE, shop).await?;
        let mut cursor: Option<CandidateCursor> = None;

        loop {
            if cancel.is_cancelled() {
                state.cancelled = true;
                break;
            }

            let query = CandidateQuery::all_time()
                .with_limit(config.chunk_size)
                .after(cursor.take());
            let page = match self.reconciler.engine().list_candidates(shop, &query).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(run_id = %state.run_id(), shop = %shop, error = %e, "Chunk fetch failed, aborting run");
                    state.abort(&e);
                    break;
                }
            };
            if page.items.is_empty() {
                break;
            }

            let chunk_bytes: usize = page.items.iter().map(Candidate::approximate_size).sum();
            let items = page.items.into_iter().map(WorkItem::Candidate).collect();
            self.dispatch_chunk(&mut state, items, config, &cancel, STREAM_RECONCILE)
                .await;
            self.report_progress(&state).await;

            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
            self.apply_backpressure(&mut state, chunk_bytes, config, &cancel).await;
        }

        self.finish_run(state).await
    }

    /// Re-run every pending failure of `shop` under a new batch run.
    ///
    /// Each original failure is flipped to retried once its order has been
    /// attempted again; a repeated failure is recorded under the new batch.
    pub async fn retry_failures(
        &self,
        shop: &str,
        config: &StreamConfig,
        cancel: CancellationToken,
    ) -> LedgerResult<RunResult> {
        config.validate()?;
        let mut state = self.start_run(RETRY_FAILED, shop).await?;

        let pending = match self.failures.list_failures(shop, true).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(run_id = %state.run_id(), shop = %shop, error = %e, "Failed to load pending failures");
                state.abort(&e);
                return self.finish_run(state).await;
            }
        };

        let mut by_order: Vec<WorkItem> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for failure in pending {
            match index.get(&failure.order_id) {
                Some(&at) => {
                    if let WorkItem::Retry { failure_ids, .. } = &mut by_order[at] {
                        failure_ids.push(failure.id);
                    }
                }
                None => {
                    index.insert(failure.order_id.clone(), by_order.len());
                    by_order.push(WorkItem::Retry {
                        purchase_id: failure.purchase_id,
                        order_code: failure.order_id,
                        failure_ids: vec![failure.id],
                    });
                }
            }
        }

        let mut remaining = by_order.into_iter().peekable();
        while remaining.peek().is_some() {
            if cancel.is_cancelled() {
                state.cancelled = true;
                break;
            }
            let chunk: Vec<WorkItem> = remaining.by_ref().take(config.chunk_size).collect();
            self.dispatch_chunk(&mut state, chunk, config, &cancel, RETRY_FAILED)
                .await;
            self.report_progress(&state).await;
        }

        self.finish_run(state).await
    }

    async fn start_run(&self, process_type: &str, shop: &str) -> LedgerResult<RunState> {
        let run_id = self.runs.create_run(process_type, shop).await?;
        let run = self
            .runs
            .get_run(run_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("batch run {}", run_id)))?;
        tracing::info!(run_id = %run_id, shop = %shop, process_type = %process_type, "Starting reconciliation run");
        Ok(RunState::new(run))
    }

    async fn finish_run(&self, state: RunState) -> LedgerResult<RunResult> {
        let (run, result) = state.finish();
        self.runs.finalize_run(&run).await?;
        tracing::info!(
            run_id = %result.run_id,
            shop = %run.shop,
            status = ?result.status,
            processed = result.total_processed,
            successful = result.total_successful,
            failed = result.total_failed,
            cancelled = result.cancelled,
            duration_ms = result.duration.as_millis() as u64,
            "Reconciliation run finished"
        );
        Ok(result)
    }

    async fn report_progress(&self, state: &RunState) {
        if let Err(e) = self
            .runs
            .update_run(state.run_id(), state.counters(), BatchStatus::Processing)
            .await
        {
            tracing::warn!(run_id = %state.run_id(), error = %e, "Failed to update run progress");
        }
    }

    /// Run one chunk with at most `max_concurrency` items in flight and fold
    /// every outcome into `state`. Once cancelled, no further item is
    /// dispatched but in-flight items complete.
    async fn dispatch_chunk(
        &self,
        state: &mut RunState,
        items: Vec<WorkItem>,
        config: &StreamConfig,
        cancel: &CancellationToken,
        process_type: &str,
    ) {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        let (tx, mut rx) = mpsc::channel(items.len().max(1));

        for item in items {
            if cancel.is_cancelled() {
                state.cancelled = true;
                break;
            }
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => {
                    state.cancelled = true;
                    break;
                }
            };
            let reconciler = self.reconciler.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let work = item.clone();
                // A panicking item still reports, as an internal failure
                let result = match tokio::spawn(async move { work.execute(&reconciler).await }).await {
                    Ok(result) => result,
                    Err(e) => Err(LedgerError::Internal(format!(
                        "Worker for order {} did not complete: {}",
                        item.order_code(),
                        e
                    ))),
                };
                let _ = tx.send((item, result)).await;
            });
        }
        drop(tx);

        while let Some((item, result)) = rx.recv().await {
            match result {
                Ok(outcome) => {
                    tracing::debug!(order = %item.order_code(), outcome = ?outcome, "Reconciled item");
                    state.record_success();
                }
                Err(e) => {
                    state.record_failure(e.category());
                    self.record_item_failure(state, &item, &e, process_type).await;
                }
            }
            if let WorkItem::Retry { failure_ids, .. } = &item {
                for failure_id in failure_ids {
                    if let Err(e) = self.failures.mark_retried(*failure_id).await {
                        tracing::warn!(failure_id = %failure_id, error = %e, "Failed to mark failure as retried");
                    }
                }
            }
        }
    }

    async fn record_item_failure(&self, state: &RunState, item: &WorkItem, error: &LedgerError, process_type: &str) {
        tracing::warn!(
            run_id = %state.run_id(),
            order = %item.order_code(),
            category = %error.category(),
            error = %error,
            "Reconciliation failed for item"
        );
        let failure = FailedReconciliation {
            id: Uuid::new_v4(),
            purchase_id: item.purchase_id(),
            order_id: item.order_code().to_string(),
            shop: state.run.shop.clone(),
            error_type: error.category(),
            message: error.to_string(),
            context: item.context(process_type),
            batch_id: state.run_id(),
            retried: false,
            created_at: chrono::Utc::now().naive_utc(),
        };
        if let Err(e) = self.failures.record_failure(&failure).await {
            tracing::warn!(run_id = %state.run_id(), order = %failure.order_id, error = %e, "Failed to persist reconciliation failure");
        }
    }

    /// Pause intake while the probe reports usage above the threshold, until
    /// memory is released, the bounded wait elapses or the run is cancelled
    async fn apply_backpressure(
        &self,
        state: &mut RunState,
        chunk_bytes: usize,
        config: &StreamConfig,
        cancel: &CancellationToken,
    ) {
        let usage = self.probe.estimated_usage(chunk_bytes);
        if usage <= config.memory_threshold_bytes {
            return;
        }
        state.backpressure_pauses += 1;
        tracing::warn!(
            run_id = %state.run_id(),
            estimated_bytes = usage,
            threshold_bytes = config.memory_threshold_bytes,
            "Memory threshold exceeded, pausing intake"
        );
        tokio::select! {
            _ = self.memory_released.notified() => {}
            _ = tokio::time::sleep(config.backpressure_wait) => {}
            _ = cancel.cancelled() => {}
        }
    }
}
