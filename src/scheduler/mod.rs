//! Request dispatching: decouples the host's control loop from inference
//! latency.
//!
//! The host submits [`Request`]s and drains [`CompletionRecord`]s on its
//! tick; a single worker thread executes them. Completions are released in
//! global submission order, which implies per-session FIFO.

mod completion;
mod dispatcher;
mod queue;
mod request;
mod worker;

pub use completion::{CompletionQueue, CompletionRecord, CompletionSink, CompletionStatus};
pub use dispatcher::{CancelOutcome, Dispatcher, DispatcherConfig, DispatcherState};
pub use queue::DEFAULT_CAPACITY;
pub use request::Request;

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
