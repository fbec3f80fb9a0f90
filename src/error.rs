//! Runtime error types for snpe-rt.
//!
//! All errors are fail-closed: invalid inputs are rejected, not truncated.
//! Every error carries a machine-readable [`ErrorKind`], a human-readable
//! message, and optionally the offending tensor name or sequence id.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request, missing inputs, extra keys.
    InvalidArgument,
    /// Rank or dimension disagreement.
    ShapeMismatch,
    /// File read/write failures.
    IoError,
    InvalidFormat,
    UnsupportedVersion,
    PlatformUnavailable,
    SymbolMissing,
    ProbeTimeout,
    /// Every accelerator in the preference chain failed to initialize.
    NoAcceleratorAvailable,
    /// The underlying runtime reported failure.
    ExecutorFailure,
    QueueFull,
    Shutdown,
    /// A cancellation flag was observed before executor invocation.
    Cancelled,
}

impl ErrorKind {
    /// Short machine-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::ShapeMismatch => "shape_mismatch",
            Self::IoError => "io_error",
            Self::InvalidFormat => "invalid_format",
            Self::UnsupportedVersion => "unsupported_version",
            Self::PlatformUnavailable => "platform_unavailable",
            Self::SymbolMissing => "symbol_missing",
            Self::ProbeTimeout => "probe_timeout",
            Self::NoAcceleratorAvailable => "no_accelerator_available",
            Self::ExecutorFailure => "executor_failure",
            Self::QueueFull => "queue_full",
            Self::Shutdown => "shutdown",
            Self::Cancelled => "cancelled",
        }
    }

    /// Process exit code used by the CLI harness.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument | Self::ShapeMismatch => 2,
            Self::IoError => 3,
            Self::PlatformUnavailable | Self::SymbolMissing => 4,
            Self::NoAcceleratorAvailable => 5,
            Self::InvalidFormat | Self::UnsupportedVersion => 7,
            _ => 9,
        }
    }

    /// Returns true if the error is a transient refusal the host may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull | Self::ProbeTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every fallible runtime operation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}{}", context_suffix(.tensor, .sequence_id))]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub tensor: Option<String>,
    pub sequence_id: Option<u64>,
}

fn context_suffix(tensor: &Option<String>, sequence_id: &Option<u64>) -> String {
    match (tensor, sequence_id) {
        (Some(t), Some(id)) => format!(" (tensor '{}', request {})", t, id),
        (Some(t), None) => format!(" (tensor '{}')", t),
        (None, Some(id)) => format!(" (request {})", id),
        (None, None) => String::new(),
    }
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), tensor: None, sequence_id: None }
    }

    /// Attach the offending tensor name.
    pub fn with_tensor(mut self, name: impl Into<String>) -> Self {
        self.tensor = Some(name.into());
        self
    }

    /// Attach the offending request's sequence id.
    pub fn with_sequence(mut self, sequence_id: u64) -> Self {
        self.sequence_id = Some(sequence_id);
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ShapeMismatch, message)
    }

    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidFormat, message)
    }

    pub fn platform_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PlatformUnavailable, message)
    }

    pub fn executor_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutorFailure, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::IoError, e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
