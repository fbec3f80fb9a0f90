//! Single worker loop: dequeue requests and execute them on their sessions.
//!
//! The worker is the only thread that calls `Session::execute` for
//! dispatched requests. It holds a session only for the duration of one
//! execution and never owns it.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::completion::{CompletionRecord, CompletionSink, CompletionStatus};
use super::dispatcher::Shared;
use super::queue::QueuedRequest;
use crate::error::{ErrorKind, RuntimeError};
use crate::telemetry::{RequestSpan, SpanExt};

/// Spawn the worker thread.
pub(super) fn spawn_worker(shared: Arc<Shared>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new().name("snpe-rt-worker".into()).spawn(move || worker_loop(&shared))
}

fn worker_loop(shared: &Shared) {
    tracing::debug!("worker started");
    while let Some(job) = shared.queue.next() {
        let (record, sink) = execute_request(job);
        shared.queue.finish_in_flight();
        shared.complete(record, sink);
    }
    tracing::debug!("worker stopped");
}

fn execute_request(job: QueuedRequest) -> (CompletionRecord, Option<Arc<dyn CompletionSink>>) {
    let QueuedRequest { id, session, request, cancelled, enqueued_at } = job;
    let span = RequestSpan::new(id, session);
    let _enter = span.enter();
    tracing::debug!(queued_ms = enqueued_at.elapsed().as_millis() as u64, "request dequeued");

    let sink = request.sink;
    let inputs = request.inputs;
    let mut outputs = request.outputs;

    let Some(handle) = request.session.upgrade() else {
        let result: Result<(), RuntimeError> = Err(RuntimeError::cancelled("session dropped"));
        span.record_result(&result);
        return (CompletionRecord::cancelled(id, session, inputs, outputs), sink);
    };

    let result = {
        let mut guard = handle.lock();
        if let Some(accelerator) = guard.bound_accelerator() {
            span.record("accelerator", accelerator.as_str());
        }
        match catch_unwind(AssertUnwindSafe(|| guard.execute(&inputs, &mut outputs, &cancelled))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "executor panicked");
                guard.recover_after_panic();
                Err(RuntimeError::executor_failure(format!("executor panicked: {}", message)))
            }
        }
    };
    span.record_result(&result);

    let record = match result {
        Ok(elapsed) => {
            span.record("latency_ms", elapsed.as_secs_f64() * 1000.0);
            CompletionRecord {
                sequence_id: id,
                session,
                status: CompletionStatus::Ok,
                inputs,
                outputs,
                error: None,
                elapsed,
            }
        }
        Err(e) if e.kind == ErrorKind::Cancelled => CompletionRecord::cancelled(id, session, inputs, outputs),
        Err(e) => {
            tracing::warn!(error = %e, "request failed");
            CompletionRecord {
                sequence_id: id,
                session,
                status: CompletionStatus::Failed(e.kind),
                inputs,
                outputs,
                error: Some(e.with_sequence(id)),
                elapsed: std::time::Duration::ZERO,
            }
        }
    };
    (record, sink)
}

/// Text of a caught panic payload.
pub(super) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
