//! Request dispatcher: bounded FIFO, one worker thread, ordered completions.
//!
//! ```text
//! host ── submit ──▶ RequestQueue ──▶ worker ── execute ──▶ Session
//!   ▲                    │ cancel                  │
//!   │                    ▼                         ▼
//!   └── drain ◀── CompletionQueue ◀── ReleaseOrder (sequence order)
//! ```
//!
//! The completion queue lock nests inside the release buffer lock. The
//! request queue lock is never held together with either.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::completion::{CompletionQueue, CompletionRecord, CompletionSink, CompletionStatus, Destination, ReleaseOrder};
use super::queue::{CancelAction, QueuedRequest, RequestQueue, DEFAULT_CAPACITY};
use super::request::Request;
use super::worker::{panic_message, spawn_worker};
use crate::error::{Result, RuntimeError};
use crate::telemetry::{self, InferenceStats, StatsSnapshot};

/// Dispatcher configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum outstanding requests; floored at 1.
    pub capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_CAPACITY }
    }
}

/// Dispatcher lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatcherState {
    Running,
    Draining,
    Stopped,
}

/// Result of [`Dispatcher::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Was pending; removed and completed as `Cancelled`.
    Removed,
    /// Is executing; reports `Cancelled` if the flag is seen before the executor runs.
    Flagged,
    /// Unknown or already finished.
    NotFound,
}

pub(super) struct Shared {
    pub(super) queue: RequestQueue,
    release: Mutex<ReleaseOrder>,
    completions: CompletionQueue,
    stats: InferenceStats,
}

impl Shared {
    /// Account for a finished request and release whatever is now in order.
    pub(super) fn complete(&self, record: CompletionRecord, sink: Option<Arc<dyn CompletionSink>>) {
        match record.status {
            CompletionStatus::Ok => self.stats.record_completed(record.elapsed),
            CompletionStatus::Cancelled => self.stats.record_cancelled(),
            CompletionStatus::Failed(_) => self.stats.record_failed(),
        }
        telemetry::record_completion(record.status.label(), record.elapsed);

        let destination = match sink {
            Some(sink) => Destination::Custom(sink),
            None => Destination::Host,
        };
        let mut forwarded = 0;
        let mut order = self.release.lock();
        for (record, destination) in order.accept(record, destination) {
            match destination {
                Destination::Host => self.completions.post_result(record),
                Destination::Custom(sink) => {
                    let sequence_id = record.sequence_id;
                    // A panicking sink loses its own record only.
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| sink.post_result(record))) {
                        tracing::error!(
                            sequence_id,
                            panic = %panic_message(payload.as_ref()),
                            "completion sink panicked; record dropped"
                        );
                    }
                    forwarded += 1;
                }
            }
        }
        drop(order);
        // Records handed to a custom sink never come back through drain.
        self.queue.release(forwarded);
    }

    fn complete_cancelled(&self, job: QueuedRequest) {
        let QueuedRequest { id, session, request, .. } = job;
        tracing::debug!(sequence_id = id, %session, "pending request cancelled");
        let record = CompletionRecord::cancelled(id, session, request.inputs, request.outputs);
        self.complete(record, request.sink);
    }
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<DispatcherState>,
    stopped: CancellationToken,
}

impl Dispatcher {
    /// Start a dispatcher and its worker thread.
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: RequestQueue::new(config.capacity),
            release: Mutex::new(ReleaseOrder::new()),
            completions: CompletionQueue::new(),
            stats: InferenceStats::new(),
        });
        let worker = spawn_worker(Arc::clone(&shared))?;
        tracing::info!(capacity = shared.queue.capacity(), "dispatcher started");
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            state: Mutex::new(DispatcherState::Running),
            stopped: CancellationToken::new(),
        })
    }

    /// Enqueue a request. Fails with `QueueFull` at capacity and `Shutdown`
    /// once shutdown has begun. Sequence ids start at 0.
    pub fn submit(&self, request: Request) -> Result<u64> {
        self.enqueue(request, None)
    }

    /// Like [`submit`](Self::submit), but waits for capacity until `deadline`.
    pub fn submit_with_deadline(&self, request: Request, deadline: Instant) -> Result<u64> {
        self.enqueue(request, Some(deadline))
    }

    fn enqueue(&self, request: Request, deadline: Option<Instant>) -> Result<u64> {
        let session = request.session_id();
        if request.session.upgrade().is_none() {
            self.shared.stats.record_rejected();
            telemetry::record_rejection("session_dropped");
            return Err(RuntimeError::invalid_argument(format!("{} has been dropped", session)));
        }
        match self.shared.queue.push(request, deadline) {
            Ok(id) => {
                self.shared.stats.record_submitted();
                tracing::debug!(sequence_id = id, %session, "request submitted");
                Ok(id)
            }
            Err(e) => {
                self.shared.stats.record_rejected();
                telemetry::record_rejection(e.kind.as_str());
                Err(e)
            }
        }
    }

    /// Cancel a pending or executing request.
    pub fn cancel(&self, sequence_id: u64) -> CancelOutcome {
        match self.shared.queue.cancel(sequence_id) {
            CancelAction::Removed(job) => {
                self.shared.complete_cancelled(job);
                CancelOutcome::Removed
            }
            CancelAction::Flagged => {
                tracing::debug!(sequence_id, "in-flight request flagged for cancellation");
                CancelOutcome::Flagged
            }
            CancelAction::NotFound => CancelOutcome::NotFound,
        }
    }

    /// Up to `max` completions in submission order. Never blocks.
    pub fn drain_completions(&self, max: usize) -> Vec<CompletionRecord> {
        let records = self.shared.completions.drain(max);
        self.shared.queue.release(records.len());
        records
    }

    /// Wait up to `timeout` for the next completion. Returns early with
    /// `None` once the dispatcher has stopped and nothing is left.
    pub async fn next_completion(&self, timeout: Duration) -> Option<CompletionRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(record) = self.take_one() {
                return Some(record);
            }
            tokio::select! {
                () = self.shared.completions.notified() => {}
                () = tokio::time::sleep_until(deadline) => return self.take_one(),
                () = self.stopped.cancelled() => return self.take_one(),
            }
        }
    }

    fn take_one(&self) -> Option<CompletionRecord> {
        let record = self.shared.completions.pop()?;
        self.shared.queue.release(1);
        Some(record)
    }

    /// Stop accepting, cancel pending requests, let the in-flight request
    /// finish, then join the worker. Idempotent; concurrent callers all
    /// return after the join.
    pub fn shutdown(&self) {
        let mut worker = self.worker.lock();
        if worker.is_none() {
            return;
        }
        *self.state.lock() = DispatcherState::Draining;

        let pending = self.shared.queue.close();
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "cancelling pending requests");
        }
        for job in pending {
            self.shared.complete_cancelled(job);
        }

        if let Some(handle) = worker.take() {
            if handle.thread().id() == std::thread::current().id() {
                tracing::warn!("shutdown called from the worker thread; not joining");
            } else if handle.join().is_err() {
                tracing::error!("dispatcher worker panicked");
            }
        }
        *self.state.lock() = DispatcherState::Stopped;
        self.stopped.cancel();
        tracing::info!(stats = ?self.shared.stats.snapshot(), "dispatcher stopped");
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.lock()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.queue.is_accepting()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Requests waiting for the worker.
    pub fn queue_depth(&self) -> usize {
        self.shared.queue.pending()
    }

    /// Requests counted against capacity.
    pub fn outstanding(&self) -> usize {
        self.shared.queue.outstanding()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state())
            .field("capacity", &self.capacity())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
