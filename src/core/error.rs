//! Error types for the logging pipeline

use std::fmt;

pub type Result<T> = std::result::Result<T, HydraError>;

#[derive(Debug, thiserror::Error)]
pub enum HydraError {
    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Queue at capacity with buffer details
    #[error("queue full: {size}/{capacity} records buffered")]
    QueueFull { size: usize, capacity: usize },

    /// Non-blocking get on an empty queue
    #[error("queue empty")]
    QueueEmpty,

    /// Shutdown has been signalled; new records are no longer queued
    #[error("shutdown in progress")]
    ShuttingDown,

    /// Logger already closed
    #[error("logger already closed")]
    LoggerClosed,

    /// Invalid configuration with details
    #[error("invalid configuration for {component}: {message}")]
    InvalidConfiguration { component: String, message: String },

    /// Handler failure with handler name and operation
    #[error("handler '{handler}' failed during {operation}: {message}")]
    Handler {
        handler: String,
        operation: String,
        message: String,
    },

    /// Writer error (generic)
    #[error("writer error: {0}")]
    Writer(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl HydraError {
    /// Create a queue full error with buffer details
    pub fn queue_full(size: usize, capacity: usize) -> Self {
        HydraError::QueueFull { size, capacity }
    }

    /// Create an invalid configuration error
    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        HydraError::InvalidConfiguration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler(
        handler: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        HydraError::Handler {
            handler: handler.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a writer error (generic)
    pub fn writer<S: Into<String>>(msg: S) -> Self {
        HydraError::Writer(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        HydraError::Other(msg.into())
    }
}

/// Categories under which [`crate::core::ErrorTracker`] counts failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    QueuePut,
    Writer,
    WriterSetup,
    ConsoleWrite,
    SyncWrite,
    HandlerEmit,
    HandlerInit,
    MetadataExtract,
    Probe,
    Callback,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::QueuePut => "queue_put",
            ErrorKind::Writer => "writer",
            ErrorKind::WriterSetup => "writer_setup",
            ErrorKind::ConsoleWrite => "console_write",
            ErrorKind::SyncWrite => "sync_write",
            ErrorKind::HandlerEmit => "handler_emit",
            ErrorKind::HandlerInit => "handler_init",
            ErrorKind::MetadataExtract => "metadata_extract",
            ErrorKind::Probe => "probe",
            ErrorKind::Callback => "callback",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
