//! Concurrent chunk dispatcher.
//!
//! Writes every planned [`Chunk`] to its routed document through a
//! [`DocumentService`], with at most [`WritePool::capacity`] writes in
//! flight, retrying each failed write with exponential backoff.
//!
//! # Flow
//!
//! ```text
//! for chunk in chunks:            ┌──────────── task (one per chunk) ───────────┐
//!   permit = pool.acquire() ────▶ │ build matrix + range address                │
//!   spawn(task) ──────────────▶   │ attempt write ─ fail ─ sleep(base·2^k) ─┐   │
//!                                 │      ▲                                  │   │
//!                                 │      └──────────────────────────────────┘   │
//!                                 │ success → progress.record()                 │
//!                                 │ drop(permit)                                │
//!                                 └─────────────────────────────────────────────┘
//! join all → collect failures → Ok(report) | Err(UploadPartialFailure)
//! ```
//!
//! Chunk tasks finish in any order. Failures never stop other chunks: they
//! are collected once every task has joined and surfaced together. Writes
//! already made stay in place when the request fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::chunk::RangeAddress;
use crate::config::UploadConfig;
use crate::error::{PipelineError, UploadFailure, WriteFailure};
use crate::models::{CellMatrix, Chunk, Row, RowSet};
use crate::progress::ProgressTracker;
use crate::traits::DocumentService;

/// Failures logged individually before the aggregate error is returned.
const LOGGED_FAILURES: usize = 5;

/// Attempt budget and backoff schedule for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay(),
        }
    }

    /// Delay after the failed 0-based `attempt`: `base · 2^attempt`, or
    /// `None` when that attempt was the last one. Doubling stops at
    /// `2^16`; configured attempt budgets stay well below that (see
    /// [`MAX_ATTEMPTS_LIMIT`](crate::config::MAX_ATTEMPTS_LIMIT)).
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        Some(self.base_delay.saturating_mul(1u32 << attempt.min(16)))
    }
}

/// Counting semaphore bounding in-flight writes of one dispatcher.
#[derive(Debug, Clone)]
pub struct WritePool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WritePool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, PipelineError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Internal(anyhow::Error::new(e).context("write pool closed")))
    }
}

/// Result of writing one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success {
        chunk_index: usize,
        attempts: u32,
        retry_delays: Vec<Duration>,
    },
    Failure(WriteFailure),
}

impl DispatchOutcome {
    pub fn chunk_index(&self) -> usize {
        match self {
            DispatchOutcome::Success { chunk_index, .. } => *chunk_index,
            DispatchOutcome::Failure(f) => f.chunk_index,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Success { .. })
    }
}

/// Summary of a fully successful dispatch. Outcomes are in chunk order.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub outcomes: Vec<DispatchOutcome>,
    pub elapsed: Duration,
}

impl DispatchReport {
    pub fn chunks_written(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Retries spent across all chunks.
    pub fn retries(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                DispatchOutcome::Success { retry_delays, .. } => retry_delays.len(),
                DispatchOutcome::Failure(f) => f.attempts.saturating_sub(1) as usize,
            })
            .sum()
    }
}

pub struct Dispatcher {
    service: Arc<dyn DocumentService>,
    pool: WritePool,
    retry: RetryPolicy,
    sheet_title: String,
}

impl Dispatcher {
    pub fn new(
        service: Arc<dyn DocumentService>,
        pool: WritePool,
        retry: RetryPolicy,
        sheet_title: impl Into<String>,
    ) -> Self {
        Self {
            service,
            pool,
            retry,
            sheet_title: sheet_title.into(),
        }
    }

    pub fn from_config(
        service: Arc<dyn DocumentService>,
        config: &UploadConfig,
        sheet_title: impl Into<String>,
    ) -> Self {
        Self::new(
            service,
            WritePool::new(config.max_concurrent_writes),
            RetryPolicy::from_config(config),
            sheet_title,
        )
    }

    pub fn pool(&self) -> &WritePool {
        &self.pool
    }

    /// Write every chunk and wait for all of them.
    ///
    /// Returns [`PipelineError::UploadPartialFailure`] if any chunk
    /// exhausted its retries, after every other chunk has finished.
    pub async fn dispatch(
        &self,
        rows: Arc<RowSet>,
        chunks: Vec<Chunk>,
        progress: Arc<ProgressTracker>,
    ) -> Result<DispatchReport, PipelineError> {
        let started = Instant::now();
        let total_chunks = chunks.len();
        tracing::debug!(
            chunks = total_chunks,
            concurrency = self.pool.capacity(),
            max_attempts = self.retry.max_attempts,
            "dispatching chunks"
        );
        let mut handles: Vec<(usize, String, JoinHandle<DispatchOutcome>)> =
            Vec::with_capacity(total_chunks);

        for chunk in chunks {
            let permit = self.pool.acquire().await?;
            let index = chunk.index;
            let document_id = chunk.document_id.clone();
            let task = ChunkTask {
                service: self.service.clone(),
                rows: rows.clone(),
                chunk,
                retry: self.retry,
                sheet_title: self.sheet_title.clone(),
            };
            let progress = progress.clone();

            let handle = tokio::spawn(
                async move {
                    let _permit = permit;
                    let outcome = task.run().await;
                    if outcome.is_success() {
                        progress.record();
                    }
                    outcome
                }
                .in_current_span(),
            );
            handles.push((index, document_id, handle));
        }

        let mut outcomes = Vec::with_capacity(total_chunks);
        for (chunk_index, document_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => DispatchOutcome::Failure(WriteFailure {
                    chunk_index,
                    document_id,
                    attempts: 0,
                    error: format!("chunk task aborted: {}", join_err),
                }),
            };
            outcomes.push(outcome);
        }
        outcomes.sort_by_key(DispatchOutcome::chunk_index);

        let failures: Vec<WriteFailure> = outcomes
            .iter()
            .filter_map(|o| match o {
                DispatchOutcome::Failure(f) => Some(f.clone()),
                DispatchOutcome::Success { .. } => None,
            })
            .collect();

        if !failures.is_empty() {
            tracing::error!(
                failed = failures.len(),
                total = total_chunks,
                "encountered errors during upload"
            );
            for (i, failure) in failures.iter().take(LOGGED_FAILURES).enumerate() {
                tracing::error!("upload error {}: {}", i + 1, failure);
            }
            return Err(PipelineError::UploadPartialFailure(UploadFailure {
                failures,
                total_chunks,
            }));
        }

        Ok(DispatchReport {
            outcomes,
            elapsed: started.elapsed(),
        })
    }
}

/// Everything one spawned chunk write owns.
struct ChunkTask {
    service: Arc<dyn DocumentService>,
    rows: Arc<RowSet>,
    chunk: Chunk,
    retry: RetryPolicy,
    sheet_title: String,
}

impl ChunkTask {
    async fn run(self) -> DispatchOutcome {
        let slice = self.rows.slice(self.chunk.rows.clone());
        let width = column_width(self.rows.field_count(), slice);
        let range = RangeAddress::for_rows(&self.sheet_title, &self.chunk.rows, width);
        let values = cell_matrix(slice);

        tracing::debug!(
            chunk = self.chunk.index,
            document = %self.chunk.document_id,
            range = %range,
            "uploading chunk"
        );

        let mut retry_delays = Vec::new();
        let mut attempt = 0u32;
        loop {
            let result = self
                .service
                .write_range(&self.chunk.document_id, &range, &values)
                .await;

            let err = match result {
                Ok(()) => {
                    return DispatchOutcome::Success {
                        chunk_index: self.chunk.index,
                        attempts: attempt + 1,
                        retry_delays,
                    }
                }
                Err(err) => err,
            };

            tracing::warn!(
                chunk = self.chunk.index,
                document = %self.chunk.document_id,
                "error updating chunk (attempt {}/{}): {:#}",
                attempt + 1,
                self.retry.max_attempts,
                err
            );

            match self.retry.delay_after(attempt) {
                Some(delay) => {
                    retry_delays.push(delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    return DispatchOutcome::Failure(WriteFailure {
                        chunk_index: self.chunk.index,
                        document_id: self.chunk.document_id.clone(),
                        attempts: attempt + 1,
                        error: format!("{:#}", err),
                    })
                }
            }
        }
    }
}

/// Columns a chunk's range must span: the header width, widened for any
/// longer ragged row in the chunk.
fn column_width(field_count: usize, rows: &[Row]) -> usize {
    rows.iter().map(Vec::len).fold(field_count, usize::max)
}

/// Copy rows into a write payload. Fields stay strings.
pub fn cell_matrix(rows: &[Row]) -> CellMatrix {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|field| serde_json::Value::String(field.clone()))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::plan_chunks;
    use crate::models::DocumentPlan;
    use crate::progress::NoProgress;
    use crate::router::ChunkRouter;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures[chunk_start_row]` writes of each range,
    /// tracks concurrency, and remembers successful ranges.
    #[derive(Default)]
    struct ScriptedService {
        failures: Mutex<HashMap<usize, u32>>,
        /// Start row of a range whose write panics.
        panic_at: Option<usize>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        written: Mutex<Vec<String>>,
    }

    impl ScriptedService {
        fn failing(start_row: usize, times: u32) -> Self {
            let svc = Self::default();
            svc.failures.lock().unwrap().insert(start_row, times);
            svc
        }
    }

    #[async_trait]
    impl DocumentService for ScriptedService {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn create(&self, _title: &str, _rows: usize, _cols: usize) -> Result<String> {
            bail!("not used")
        }

        async fn share(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn write_range(&self, id: &str, range: &RangeAddress, _values: &CellMatrix) -> Result<()> {
            if self.panic_at == Some(range.start_row) {
                panic!("boom");
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&range.start_row) {
                if *left > 0 {
                    *left -= 1;
                    bail!("HTTP 503 Service Unavailable");
                }
            }
            self.written.lock().unwrap().push(format!("{}:{}", id, range));
            Ok(())
        }

        fn document_url(&self, id: &str) -> String {
            id.to_string()
        }
    }

    fn rows(n: usize, fields: usize) -> Arc<RowSet> {
        Arc::new(RowSet::new(
            (0..n)
                .map(|r| (0..fields).map(|f| format!("r{}c{}", r, f)).collect())
                .collect(),
        ))
    }

    fn chunks(total_rows: usize, fields: usize, max_cells: usize, docs: usize) -> Vec<Chunk> {
        let plan = plan_chunks(total_rows, fields, max_cells).unwrap();
        let documents =
            DocumentPlan::new((0..docs).map(|i| format!("doc-{}", i)).collect()).unwrap();
        ChunkRouter::new(docs, 35).unwrap().assign(&plan.ranges, &documents)
    }

    fn tracker(total: usize) -> Arc<ProgressTracker> {
        Arc::new(ProgressTracker::new("req-test", total, Arc::new(NoProgress)))
    }

    fn dispatcher(service: Arc<ScriptedService>, bound: usize) -> Dispatcher {
        Dispatcher::new(service, WritePool::new(bound), RetryPolicy::default(), "Sheet1")
    }

    #[test]
    fn backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(2), None);

        let five = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(five.delay_after(3), Some(Duration::from_millis(800)));
        assert_eq!(five.delay_after(4), None);
    }

    #[test]
    fn single_attempt_never_sleeps() {
        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_after(0), None);
    }

    #[test]
    fn matrix_keeps_ragged_rows_as_strings() {
        let m = cell_matrix(&[vec!["a".into(), "007".into()], vec!["x".into()]]);
        assert_eq!(m[0][1], serde_json::json!("007"));
        assert_eq!(m[1].len(), 1);
    }

    #[test]
    fn width_follows_widest_row() {
        let rows = vec![vec!["a".to_string(); 2], vec!["b".to_string(); 5]];
        assert_eq!(column_width(3, &rows), 5);
        assert_eq!(column_width(3, &rows[..1]), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn all_chunks_written() {
        let service = Arc::new(ScriptedService::default());
        let progress = tracker(10);
        let report = dispatcher(service.clone(), 5)
            .dispatch(rows(100, 4), chunks(100, 4, 40, 1), progress.clone())
            .await
            .unwrap();
        assert_eq!(report.chunks_written(), 10);
        assert_eq!(report.retries(), 0);
        assert_eq!(progress.completed(), 10);

        let written = service.written.lock().unwrap();
        assert_eq!(written.len(), 10);
        assert!(written.contains(&"doc-0:Sheet1!A1:D10".to_string()));
        assert!(written.contains(&"doc-0:Sheet1!A91:D100".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_then_succeed_records_two_delays() {
        let service = Arc::new(ScriptedService::failing(1, 2));
        let report = dispatcher(service, 5)
            .dispatch(rows(10, 2), chunks(10, 2, 100, 1), tracker(1))
            .await
            .unwrap();
        assert_eq!(
            report.outcomes,
            vec![DispatchOutcome::Success {
                chunk_index: 0,
                attempts: 3,
                retry_delays: vec![Duration::from_secs(1), Duration::from_secs(2)],
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_chunk_fails_request() {
        // Chunk 1 covers rows 10..20 and never succeeds.
        let service = Arc::new(ScriptedService::failing(11, u32::MAX));
        let progress = tracker(3);
        let err = dispatcher(service.clone(), 2)
            .dispatch(rows(30, 2), chunks(30, 2, 20, 1), progress.clone())
            .await
            .unwrap_err();

        match err {
            PipelineError::UploadPartialFailure(agg) => {
                assert_eq!(agg.count(), 1);
                assert_eq!(agg.total_chunks, 3);
                let first = agg.first().unwrap();
                assert_eq!(first.chunk_index, 1);
                assert_eq!(first.document_id, "doc-0");
                assert_eq!(first.attempts, 3);
                assert!(first.error.contains("503"));
            }
            other => panic!("unexpected error: {}", other),
        }
        // The other chunks still ran to completion.
        assert_eq!(service.written.lock().unwrap().len(), 2);
        assert_eq!(progress.completed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_failure_counted() {
        let service = Arc::new(ScriptedService::default());
        {
            let mut f = service.failures.lock().unwrap();
            for start in [1, 11, 21, 31] {
                f.insert(start, u32::MAX);
            }
        }
        let err = dispatcher(service, 3)
            .dispatch(rows(40, 1), chunks(40, 1, 10, 1), tracker(4))
            .await
            .unwrap_err();
        match err {
            PipelineError::UploadPartialFailure(agg) => {
                assert_eq!(agg.count(), 4);
                let indices: Vec<usize> = agg.failures.iter().map(|f| f.chunk_index).collect();
                assert_eq!(indices, vec![0, 1, 2, 3]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency_bound() {
        let service = Arc::new(ScriptedService::default());
        let d = dispatcher(service.clone(), 4);
        d.dispatch(rows(400, 2), chunks(400, 2, 20, 1), tracker(40))
            .await
            .unwrap();
        let max = service.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 4, "max in flight {}", max);
        assert_eq!(max, 4);
        assert_eq!(d.pool().available(), 4);
    }

    #[tokio::test]
    async fn panicking_chunk_becomes_failure() {
        let service = Arc::new(ScriptedService {
            panic_at: Some(1),
            ..Default::default()
        });
        let d = dispatcher(service.clone(), 1);
        let err = d
            .dispatch(rows(20, 2), chunks(20, 2, 20, 1), tracker(2))
            .await
            .unwrap_err();

        match err {
            PipelineError::UploadPartialFailure(agg) => {
                assert_eq!(agg.count(), 1);
                assert_eq!(agg.total_chunks, 2);
                let first = agg.first().unwrap();
                assert_eq!(first.chunk_index, 0);
                assert_eq!(first.attempts, 0);
                assert!(first.error.contains("chunk task aborted"), "{}", first.error);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(service.written.lock().unwrap().len(), 1);
        assert_eq!(d.pool().capacity(), 1);
        assert_eq!(d.pool().available(), d.pool().capacity());
    }

    #[tokio::test(start_paused = true)]
    async fn permits_released_after_failures() {
        let service = Arc::new(ScriptedService::failing(1, u32::MAX));
        let d = dispatcher(service, 2);
        let _ = d
            .dispatch(rows(10, 1), chunks(10, 1, 5, 1), tracker(2))
            .await;
        assert_eq!(d.pool().available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn routes_follow_plan_across_documents() {
        let service = Arc::new(ScriptedService::default());
        // 80 chunks of one row over 3 documents: runs of 35, 35, 10.
        dispatcher(service.clone(), 8)
            .dispatch(rows(80, 1), chunks(80, 1, 1, 3), tracker(80))
            .await
            .unwrap();
        let written = service.written.lock().unwrap();
        let count = |doc: &str| written.iter().filter(|w| w.starts_with(doc)).count();
        assert_eq!(count("doc-0:"), 35);
        assert_eq!(count("doc-1:"), 35);
        assert_eq!(count("doc-2:"), 10);
    }
}
