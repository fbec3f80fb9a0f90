//! Process-wide log sink for platform messages.

use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Runtime log levels, ordered from least to most verbose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Fatal,
    Error,
    #[default]
    Warn,
    Info,
    Verbose,
}

impl FromStr for LogLevel {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fatal" => Ok(Self::Fatal),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "verbose" | "debug" | "trace" => Ok(Self::Verbose),
            other => Err(RuntimeError::invalid_argument(format!("unknown log level '{}'", other))),
        }
    }
}

/// Receives platform log messages.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

static LOG_SINK: RwLock<Option<Arc<dyn LogSink>>> = parking_lot::const_rwlock(None);

pub(crate) fn install_log_sink(sink: Arc<dyn LogSink>) {
    *LOG_SINK.write() = Some(sink);
}

pub fn clear_log_sink() {
    *LOG_SINK.write() = None;
}

/// Forward a platform message to `tracing` and to the installed sink.
pub fn emit(level: LogLevel, message: &str) {
    match level {
        LogLevel::Fatal | LogLevel::Error => tracing::error!(target: "snpe_rt::platform", "{}", message),
        LogLevel::Warn => tracing::warn!(target: "snpe_rt::platform", "{}", message),
        LogLevel::Info => tracing::info!(target: "snpe_rt::platform", "{}", message),
        LogLevel::Verbose => tracing::debug!(target: "snpe_rt::platform", "{}", message),
    }
    if let Some(sink) = LOG_SINK.read().as_ref() {
        sink.log(level, message);
    }
}
