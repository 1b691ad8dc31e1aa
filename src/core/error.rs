//! Error types for bus and batch-system operations.

use thiserror::Error;

use crate::core::admission::InsufficientSystemResources;
use crate::core::message::MessageKind;

/// Protocol errors raised by bus handles. These are programmer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Publish was attempted through an outbox never bound to a bus.
    #[error("cannot send message when not connected to a bus")]
    NotConnected,
    /// The inbox never registered for this message kind.
    #[error("inbox is not subscribed to {0} messages")]
    UnsubscribedType(MessageKind),
}

/// Errors produced by batch system backends.
#[derive(Debug, Error)]
pub enum BatchSystemError {
    /// The job asked for more than the backend can provide.
    #[error(transparent)]
    InsufficientResources(#[from] InsufficientSystemResources),
    /// `set_env` was called without a value for a variable the caller's
    /// environment does not define.
    #[error("{0} does not exist in current environment")]
    MissingEnvironment(String),
    /// The backend has been shut down.
    #[error("batch system has been shut down")]
    Shutdown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Filesystem failure, e.g. during worker cleanup.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from reading or writing a persisted message log.
#[derive(Debug, Error)]
pub enum MessageLogError {
    /// Underlying reader or writer failed.
    #[error("message log i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// A complete record could not be decoded.
    #[error("corrupt message log record on line {line}: {source}")]
    Decode {
        /// One-based line number of the bad record.
        line: usize,
        /// Decoder error.
        source: serde_json::Error,
    },
    /// A message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
