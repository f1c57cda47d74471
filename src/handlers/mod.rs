//! Destination handlers for the async pipeline

pub mod composite;
pub mod console;
pub mod file;

pub use composite::CompositeHandler;
pub use console::{ConsoleHandler, ConsoleStream};
pub use file::FileHandler;

use crate::core::error::Result;
use crate::core::record::LogRecord;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Renders a record into the single line a handler writes. The line
/// content passes through the pipeline unchanged; handlers append the
/// trailing newline.
pub type Formatter = Arc<dyn Fn(&LogRecord) -> String + Send + Sync>;

pub(crate) fn default_formatter() -> Formatter {
    Arc::new(LogRecord::format_line)
}

/// Per-handler observable counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HandlerStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub sync_fallbacks: u64,
    pub errors_by_kind: HashMap<String, u64>,
    pub queue_size: usize,
    pub writer_alive: bool,
    pub uptime_secs: f64,
}

/// A destination-specific consumer of log records.
///
/// Handlers isolate their failures: `emit_async` records internal errors
/// in the handler's own tracker and only surfaces them to the dispatcher
/// for accounting, never to the producer.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// Bring up the handler (create sinks, start the writer task).
    /// Idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Accept one record: enqueue it, or write synchronously under
    /// memory pressure or queue failure.
    async fn emit_async(&self, record: &LogRecord) -> Result<()>;

    /// Graceful termination through the two-phase shutdown protocol.
    async fn aclose(&self) -> Result<()>;

    /// Best-effort synchronous teardown for non-async call sites.
    fn force_sync_shutdown(&self);

    fn stats(&self) -> HandlerStats;

    fn is_healthy(&self) -> bool;

    /// Nested health dictionary for the logger-level status surface.
    fn health_status(&self) -> Value;
}
