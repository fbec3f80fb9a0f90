//! Request spans and result recording.

use tracing::{info_span, Span};

use crate::session::SessionId;

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for dispatcher request spans.
pub struct RequestSpan;

impl RequestSpan {
    /// Span for one request. `status`, `error.message`, `accelerator` and
    /// `latency_ms` are filled in by the worker.
    pub fn new(sequence_id: u64, session: SessionId) -> Span {
        info_span!(
            "inference_request",
            sequence_id,
            session = %session,
            accelerator = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
