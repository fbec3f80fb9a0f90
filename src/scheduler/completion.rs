//! Completion records, sinks and the host-drained completion queue.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

use crate::error::{ErrorKind, RuntimeError};
use crate::session::{SessionId, TensorMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum CompletionStatus {
    Ok,
    Cancelled,
    Failed(ErrorKind),
}

impl CompletionStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Cancelled => "cancelled",
            Self::Failed(kind) => kind.as_str(),
        }
    }
}

/// Outcome of one request, delivered in submission order.
#[derive(Debug)]
pub struct CompletionRecord {
    pub sequence_id: u64,
    pub session: SessionId,
    pub status: CompletionStatus,
    /// Request buffers handed back to the host.
    pub inputs: TensorMap,
    pub outputs: TensorMap,
    pub error: Option<RuntimeError>,
    /// Executor time; zero when the executor was not invoked.
    pub elapsed: Duration,
}

impl CompletionRecord {
    pub(crate) fn cancelled(sequence_id: u64, session: SessionId, inputs: TensorMap, outputs: TensorMap) -> Self {
        Self {
            sequence_id,
            session,
            status: CompletionStatus::Cancelled,
            inputs,
            outputs,
            error: Some(RuntimeError::cancelled("request cancelled").with_sequence(sequence_id)),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Receives completion records.
///
/// Called from the dispatcher's worker thread or from the thread that
/// cancelled a pending request, while the release lock is held. Implementations
/// must not block and must not call back into the dispatcher.
pub trait CompletionSink: Send + Sync {
    fn post_result(&self, record: CompletionRecord);
}

/// Default sink: a queue the host drains on its tick.
#[derive(Default)]
pub struct CompletionQueue {
    records: Mutex<VecDeque<CompletionRecord>>,
    notify: Notify,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Up to `max` records, oldest first. Never blocks on the worker.
    pub fn drain(&self, max: usize) -> Vec<CompletionRecord> {
        let mut records = self.records.lock();
        let n = max.min(records.len());
        records.drain(..n).collect()
    }

    pub fn pop(&self) -> Option<CompletionRecord> {
        self.records.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until a record may be available.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl CompletionSink for CompletionQueue {
    fn post_result(&self, record: CompletionRecord) {
        self.records.lock().push_back(record);
        self.notify.notify_one();
    }
}

/// Where a released record goes.
pub(crate) enum Destination {
    Host,
    Custom(Arc<dyn CompletionSink>),
}

/// Reorder buffer: records are released strictly in sequence order, each
/// to its own destination.
pub(crate) struct ReleaseOrder {
    next: u64,
    held: BTreeMap<u64, (CompletionRecord, Destination)>,
}

impl ReleaseOrder {
    pub(crate) fn new() -> Self {
        Self { next: 0, held: BTreeMap::new() }
    }

    /// Accept a record and return every record now releasable, in order.
    pub(crate) fn accept(
        &mut self,
        record: CompletionRecord,
        destination: Destination,
    ) -> Vec<(CompletionRecord, Destination)> {
        self.held.insert(record.sequence_id, (record, destination));
        let mut ready = Vec::new();
        while let Some(entry) = self.held.remove(&self.next) {
            ready.push(entry);
            self.next += 1;
        }
        ready
    }

    pub(crate) fn held(&self) -> usize {
        self.held.len()
    }
}
