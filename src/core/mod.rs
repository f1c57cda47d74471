//! Core pipeline types: records, queues, monitors, and the dispatcher

pub mod error;
pub mod error_tracker;
pub mod health;
pub mod level;
pub mod logger;
pub mod memory;
pub mod perf;
pub mod queue;
pub mod record;
pub mod shutdown;
pub mod tasks;

pub use error::{ErrorKind, HydraError, Result};
pub use error_tracker::{ErrorCallback, ErrorStats, ErrorTracker, DEFAULT_ERROR_THRESHOLD};
pub use health::{HealthMonitor, HealthSignals, SystemMetrics};
pub use level::LogLevel;
pub use logger::{AsyncHydraLogger, LoggerBuilder};
pub use memory::{MemoryMonitor, MemoryStats, DEFAULT_MEMORY_THRESHOLD};
pub use perf::{OpStats, PerformanceMonitor};
pub use queue::{
    BoundedQueue, OverflowPolicy, QueueStats, DEFAULT_GET_TIMEOUT, DEFAULT_PUT_TIMEOUT,
};
pub use record::{AttrValue, LayeredMessage, LogRecord, DEFAULT_LAYER};
pub use shutdown::{
    ShutdownManager, ShutdownPhase, ShutdownStats, DEFAULT_CLEANUP_TIMEOUT, DEFAULT_FLUSH_TIMEOUT,
};
pub use tasks::{ShutdownSignal, TaskManager, TaskStats, DEFAULT_SHUTDOWN_TIMEOUT};
