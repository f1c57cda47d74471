//! # Hydra Logger
//!
//! A high-throughput, multi-destination structured logging library built
//! around an asynchronous pipeline.
//!
//! ## Features
//!
//! - **Bounded buffering**: per-handler queues with configurable
//!   overflow policy (`drop_oldest`, `error`, `block`) and explicit loss
//!   accounting
//! - **Multiple destinations**: file, console, and composite fan-out
//!   handlers with per-handler error isolation
//! - **Backpressure**: a memory monitor diverts records onto a
//!   synchronous fallback path instead of growing queues under pressure
//! - **Safe termination**: a two-phase flush/cleanup shutdown protocol
//!   that never silently discards buffered records
//! - **Context & tracing**: task-local context stacks and trace/span
//!   propagation attached to every record

pub mod config;
pub mod context;
pub mod core;
pub mod handlers;

pub mod prelude {
    pub use crate::config::{HandlerConfig, LoggerConfig};
    pub use crate::context::{Context, ContextStore, SpanStatus, TraceContext};
    pub use crate::core::{
        AsyncHydraLogger, AttrValue, BoundedQueue, ErrorKind, HydraError, LogLevel, LogRecord,
        LoggerBuilder, OverflowPolicy, Result,
    };
    pub use crate::handlers::{
        CompositeHandler, ConsoleHandler, ConsoleStream, FileHandler, Handler, HandlerStats,
    };
}

pub use config::{HandlerConfig, LoggerConfig};
pub use context::{Context, ContextStore, ContextSwitcher, Span, SpanStatus, TraceContext};
pub use core::{
    AsyncHydraLogger, AttrValue, BoundedQueue, ErrorKind, ErrorTracker, HealthMonitor, HydraError,
    LayeredMessage, LogLevel, LogRecord, LoggerBuilder, MemoryMonitor, OverflowPolicy,
    PerformanceMonitor, Result, ShutdownManager, ShutdownPhase, ShutdownSignal, TaskManager,
};
pub use handlers::{
    CompositeHandler, ConsoleHandler, ConsoleStream, FileHandler, Handler, HandlerStats,
};
