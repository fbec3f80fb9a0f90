//! Telemetry: structured logging, request spans, metrics and runtime stats.
//!
//! Logging goes through `tracing`; counters and histograms go through the
//! `metrics` facade so an embedding host can install any recorder. The
//! in-process [`InferenceStats`] keeps a serializable copy for reports and
//! periodic stats lines.

mod logging;
mod metrics;
mod spans;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{record_completion, record_fallback, record_queue_depth, record_rejection};
pub use spans::{RequestSpan, SpanExt};
pub use store::{HistogramSummary, InferenceStats, StatsSnapshot};
