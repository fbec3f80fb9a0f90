//! Requests submitted to the dispatcher.

use std::fmt;
use std::sync::Arc;

use super::completion::CompletionSink;
use crate::session::{SessionHandle, SessionId, TensorMap, WeakSession};

/// One inference request.
///
/// Buffers move into the request and come back in the completion record.
/// The session is held weakly: dropping every [`SessionHandle`] while the
/// request is queued completes it as `Cancelled`.
pub struct Request {
    pub(crate) session: WeakSession,
    pub(crate) inputs: TensorMap,
    pub(crate) outputs: TensorMap,
    pub(crate) sink: Option<Arc<dyn CompletionSink>>,
}

impl Request {
    pub fn new(session: &SessionHandle, inputs: TensorMap) -> Self {
        Self { session: session.downgrade(), inputs, outputs: TensorMap::new(), sink: None }
    }

    /// Pre-allocated output buffers. Keys absent here are allocated by the
    /// session from the output descriptors.
    pub fn with_outputs(mut self, outputs: TensorMap) -> Self {
        self.outputs = outputs;
        self
    }

    /// Deliver the completion to `sink` instead of the dispatcher's queue.
    pub fn with_sink(mut self, sink: Arc<dyn CompletionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("session", &self.session.id())
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("custom_sink", &self.sink.is_some())
            .finish()
    }
}
