//! The multi-handler dispatch core

use crate::config::LoggerConfig;
use crate::context::scope::ContextStore;
use crate::context::trace;
use crate::core::error::{ErrorKind, HydraError, Result};
use crate::core::error_tracker::ErrorTracker;
use crate::core::health::{HealthMonitor, HealthSignals};
use crate::core::level::LogLevel;
use crate::core::perf::{PerformanceMonitor, OP_LOG};
use crate::core::record::{AttrValue, LayeredMessage, LogRecord};
use crate::core::tasks::{ShutdownSignal, TaskManager};
use crate::handlers::{ConsoleHandler, Handler, HandlerStats};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Accepts records from any number of producer tasks and fans each one
/// out to every registered handler. Handler failures are recorded and
/// isolated; `log` never fails and never panics outward.
///
/// # Example
///
/// ```no_run
/// use hydra_logger::prelude::*;
///
/// # async fn example() -> hydra_logger::Result<()> {
/// let logger = AsyncHydraLogger::builder()
///     .file("app.log")
///     .console(ConsoleStream::Stderr)
///     .build()?;
///
/// logger.initialize().await?;
/// logger.info("service started").await;
/// logger.info(("AUTH", "login accepted")).await;
/// logger.aclose().await?;
/// # Ok(())
/// # }
/// ```
pub struct AsyncHydraLogger {
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
    context: ContextStore,
    tasks: TaskManager,
    errors: ErrorTracker,
    health: HealthMonitor,
    perf: PerformanceMonitor,
    initialized: AtomicBool,
    closed: AtomicBool,
    start: Instant,
}

impl AsyncHydraLogger {
    /// Build a logger from a structured configuration. An empty handler
    /// list falls back to a single stderr console handler.
    pub fn new(config: LoggerConfig) -> Result<Self> {
        let mut handlers: Vec<Arc<dyn Handler>> = Vec::with_capacity(config.handlers.len());
        for handler_config in &config.handlers {
            handlers.push(handler_config.build()?);
        }
        if handlers.is_empty() {
            handlers.push(Arc::new(ConsoleHandler::new()));
        }
        Ok(Self::from_handlers(handlers))
    }

    pub fn from_handlers(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            handlers: RwLock::new(handlers),
            context: ContextStore::new(),
            tasks: TaskManager::new(ShutdownSignal::new()),
            errors: ErrorTracker::new(),
            health: HealthMonitor::new(),
            perf: PerformanceMonitor::new(),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new()
    }

    /// Handle to the task-local context/trace machinery.
    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    /// Initialize every handler in order. Idempotent. Fails with
    /// `LoggerClosed` on a closed logger, and otherwise only when every
    /// handler fails to come up; partial failures are recorded and
    /// visible through the health surface.
    pub async fn initialize(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HydraError::LoggerClosed);
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handlers = self.snapshot_handlers();
        let total = handlers.len();
        let mut failures = 0usize;
        let mut last_error = None;
        for handler in handlers {
            if let Err(error) = handler.initialize().await {
                self.errors.record(ErrorKind::HandlerInit, &error);
                failures += 1;
                last_error = Some(error);
            }
        }

        if total > 0 && failures == total {
            return Err(last_error.unwrap_or_else(|| HydraError::other("no handler came up")));
        }
        Ok(())
    }

    fn snapshot_handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers.read().clone()
    }

    /// Log one record. Builds the record with the task's current trace
    /// and context metadata attached, then dispatches it concurrently to
    /// every registered handler. Never returns an error to the caller.
    pub async fn log(
        &self,
        layer: &str,
        level: LogLevel,
        message: &str,
        extra: Option<BTreeMap<String, AttrValue>>,
    ) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let started = Instant::now();

        if !self.initialized.load(Ordering::SeqCst) {
            // First log call brings the handlers up; bring-up failures
            // are recorded, the record is still dispatched.
            let _ = self.initialize().await;
        }

        let record = self.build_record(layer, level, message, extra);

        let handlers = self.snapshot_handlers();
        let mut joins = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let task_record = record.clone();
            joins.push(tokio::spawn(async move {
                handler.emit_async(&task_record).await
            }));
        }
        for join in joins {
            match join.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => self.errors.record(ErrorKind::HandlerEmit, &error),
                Err(join_error) => self.errors.record(
                    ErrorKind::HandlerEmit,
                    &HydraError::other(format!("emit task failed: {}", join_error)),
                ),
            }
        }

        self.perf.record(OP_LOG, started.elapsed());
    }

    fn build_record(
        &self,
        layer: &str,
        level: LogLevel,
        message: &str,
        extra: Option<BTreeMap<String, AttrValue>>,
    ) -> LogRecord {
        let mut record = LogRecord::new(level, layer, message);
        if let Some(extra) = extra {
            record.attributes.extend(extra);
        }

        if let Some(context) = ContextStore::current() {
            for (key, value) in &context.metadata {
                match AttrValue::from_json(value) {
                    Ok(attr) => {
                        record.attributes.entry(key.clone()).or_insert(attr);
                    }
                    Err(error) => self
                        .errors
                        .record(ErrorKind::MetadataExtract, &error.into()),
                }
            }
        }

        if let Some((trace_id, span_id, correlation_id)) = trace::current_trace_ids() {
            record.trace_id = Some(trace_id);
            record.span_id = Some(span_id);
            record.correlation_id = Some(correlation_id);
        }
        record
    }

    pub async fn debug(&self, message: impl Into<LayeredMessage>) {
        let m = message.into();
        self.log(&m.layer, LogLevel::Debug, &m.message, None).await;
    }

    pub async fn info(&self, message: impl Into<LayeredMessage>) {
        let m = message.into();
        self.log(&m.layer, LogLevel::Info, &m.message, None).await;
    }

    pub async fn warning(&self, message: impl Into<LayeredMessage>) {
        let m = message.into();
        self.log(&m.layer, LogLevel::Warning, &m.message, None).await;
    }

    pub async fn error(&self, message: impl Into<LayeredMessage>) {
        let m = message.into();
        self.log(&m.layer, LogLevel::Error, &m.message, None).await;
    }

    pub async fn critical(&self, message: impl Into<LayeredMessage>) {
        let m = message.into();
        self.log(&m.layer, LogLevel::Critical, &m.message, None)
            .await;
    }

    pub fn add_handler(&self, handler: Arc<dyn Handler>) {
        self.handlers.write().push(handler);
    }

    pub fn remove_handler(&self, handler: &Arc<dyn Handler>) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        handlers.len() != before
    }

    pub fn get_handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.snapshot_handlers()
    }

    pub fn get_handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Graceful shutdown: run every handler through its own two-phase
    /// shutdown, then release the logger's own services. Fails only when
    /// every handler teardown fails.
    pub async fn aclose(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handlers = self.snapshot_handlers();
        let total = handlers.len();
        let mut failures = 0usize;
        let mut last_error = None;
        for handler in handlers {
            if let Err(error) = handler.aclose().await {
                self.errors.record(ErrorKind::HandlerEmit, &error);
                failures += 1;
                last_error = Some(error);
            }
        }

        self.tasks.shutdown().await;
        self.errors.clear_callbacks();
        self.health.reset();

        if total > 0 && failures == total {
            return Err(last_error.unwrap_or_else(|| HydraError::other("close failed")));
        }
        Ok(())
    }

    /// Best-effort synchronous shutdown for non-async call sites.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for handler in self.handlers.read().iter() {
            handler.force_sync_shutdown();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn aggregate_stats(handlers: &[Arc<dyn Handler>]) -> HandlerStats {
        let mut aggregate = HandlerStats::default();
        for handler in handlers {
            let stats = handler.stats();
            aggregate.enqueued += stats.enqueued;
            aggregate.dequeued += stats.dequeued;
            aggregate.dropped += stats.dropped;
            aggregate.sync_fallbacks += stats.sync_fallbacks;
            aggregate.queue_size += stats.queue_size;
            aggregate.writer_alive |= stats.writer_alive;
        }
        aggregate
    }

    pub fn get_health_status(&self) -> Value {
        let handlers = self.snapshot_handlers();
        let statuses: Vec<Value> = handlers.iter().map(|h| h.health_status()).collect();

        let mut status = json!({
            "uptime": self.start.elapsed().as_secs_f64(),
            "is_healthy": self.is_healthy(),
            "handler_count": handlers.len(),
            "handlers": statuses,
            "error_stats": self.errors.stats(),
            "context_switches": self.context.switcher().stats(),
            "monitor": self.health.stats(),
        });
        if let Some(system) = self.health.system_metrics() {
            status["system"] = serde_json::to_value(system).unwrap_or(Value::Null);
        }
        status
    }

    pub fn is_healthy(&self) -> bool {
        let handlers = self.snapshot_handlers();
        if !handlers.iter().all(|h| h.is_healthy()) {
            return false;
        }
        let aggregate = Self::aggregate_stats(&handlers);
        self.health.evaluate(&HealthSignals {
            total_errors: self.errors.total(),
            error_threshold: self.errors.threshold(),
            queue_full: false,
            dropped: aggregate.dropped,
        })
    }

    pub fn get_performance_metrics(&self) -> Value {
        self.perf.metrics()
    }

    pub fn is_performance_healthy(&self) -> bool {
        self.perf.is_performance_healthy()
    }
}

impl Drop for AsyncHydraLogger {
    fn drop(&mut self) {
        // Last resort for loggers dropped without aclose(): drain what
        // can be drained synchronously.
        if !self.closed.load(Ordering::SeqCst) {
            self.close();
        }
    }
}

/// Fluent construction as an alternative to [`LoggerConfig`].
///
/// # Example
///
/// ```no_run
/// use hydra_logger::prelude::*;
///
/// # fn example() -> hydra_logger::Result<()> {
/// let logger = AsyncHydraLogger::builder()
///     .file("logs/app.log")
///     .console(ConsoleStream::Stdout)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct LoggerBuilder {
    configs: Vec<crate::config::HandlerConfig>,
    handlers: Vec<Arc<dyn Handler>>,
}

impl LoggerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler from configuration.
    #[must_use = "builder methods return a new value"]
    pub fn config(mut self, config: crate::config::HandlerConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Add a file handler for `path` with default queue settings.
    #[must_use = "builder methods return a new value"]
    pub fn file(self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config(crate::config::HandlerConfig::file(path))
    }

    /// Add a console handler for `stream` with default queue settings.
    #[must_use = "builder methods return a new value"]
    pub fn console(self, stream: crate::handlers::ConsoleStream) -> Self {
        self.config(crate::config::HandlerConfig::console(stream))
    }

    /// Add an already-constructed handler.
    #[must_use = "builder methods return a new value"]
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> Result<AsyncHydraLogger> {
        let mut handlers = self.handlers;
        for config in &self.configs {
            handlers.push(config.build()?);
        }
        if handlers.is_empty() {
            handlers.push(Arc::new(ConsoleHandler::new()));
        }
        Ok(AsyncHydraLogger::from_handlers(handlers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::FileHandler;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_builder_defaults_to_console() {
        let logger = AsyncHydraLogger::builder().build().unwrap();
        assert_eq!(logger.get_handler_count(), 1);
        logger.aclose().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = tempdir().unwrap();
        let logger = AsyncHydraLogger::builder()
            .file(dir.path().join("app.log"))
            .build()
            .unwrap();
        logger.initialize().await.unwrap();
        logger.initialize().await.unwrap();
        logger.aclose().await.unwrap();
    }

    #[tokio::test]
    async fn test_log_reaches_every_handler() {
        let dir = tempdir().unwrap();
        let path_a = dir.path().join("a.log");
        let path_b = dir.path().join("b.log");
        let logger = AsyncHydraLogger::builder()
            .file(&path_a)
            .file(&path_b)
            .build()
            .unwrap();

        logger.initialize().await.unwrap();
        logger.info("fan out").await;
        logger.aclose().await.unwrap();

        for path in [path_a, path_b] {
            let content = std::fs::read_to_string(path).unwrap();
            assert!(content.contains("fan out"));
        }
    }

    #[tokio::test]
    async fn test_convenience_layer_forms() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layers.log");
        let logger = AsyncHydraLogger::builder().file(&path).build().unwrap();

        logger.initialize().await.unwrap();
        logger.info("bare message").await;
        logger.warning(("AUTH", "layered message")).await;
        logger.aclose().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[DEFAULT] bare message"));
        assert!(content.contains("[AUTH] layered message"));
        assert!(content.contains("[WARNING "));
    }

    #[tokio::test]
    async fn test_add_remove_handler() {
        let logger = AsyncHydraLogger::builder().build().unwrap();
        assert_eq!(logger.get_handler_count(), 1);

        let dir = tempdir().unwrap();
        let extra: Arc<dyn Handler> = Arc::new(FileHandler::new(dir.path().join("x.log")));
        logger.add_handler(Arc::clone(&extra));
        assert_eq!(logger.get_handler_count(), 2);

        assert!(logger.remove_handler(&extra));
        assert!(!logger.remove_handler(&extra));
        assert_eq!(logger.get_handler_count(), 1);
        logger.aclose().await.unwrap();
    }

    #[tokio::test]
    async fn test_log_after_close_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("closed.log");
        let logger = AsyncHydraLogger::builder().file(&path).build().unwrap();

        logger.initialize().await.unwrap();
        logger.info("before close").await;
        logger.aclose().await.unwrap();
        logger.info("after close").await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("before close"));
        assert!(!content.contains("after close"));
    }

    #[tokio::test]
    async fn test_aclose_twice_is_noop() {
        let logger = AsyncHydraLogger::builder().build().unwrap();
        logger.aclose().await.unwrap();
        logger.aclose().await.unwrap();
        assert!(logger.is_closed());
    }

    #[tokio::test]
    async fn test_initialize_after_close_is_rejected() {
        let logger = AsyncHydraLogger::builder().build().unwrap();
        logger.aclose().await.unwrap();
        assert!(matches!(
            logger.initialize().await,
            Err(HydraError::LoggerClosed)
        ));
    }

    #[tokio::test]
    async fn test_health_and_performance_surfaces() {
        let dir = tempdir().unwrap();
        let logger = AsyncHydraLogger::builder()
            .file(dir.path().join("h.log"))
            .build()
            .unwrap();

        logger.initialize().await.unwrap();
        logger.info("sample").await;

        let health = logger.get_health_status();
        assert!(health["uptime"].as_f64().unwrap() >= 0.0);
        assert_eq!(health["handler_count"], 1);
        assert!(health["handlers"][0]["queue_stats"].is_object());

        let perf = logger.get_performance_metrics();
        assert_eq!(perf["operations"]["log"]["count"], 1);
        assert!(logger.is_performance_healthy());

        logger.aclose().await.unwrap();
    }

    #[tokio::test]
    async fn test_trace_ids_attached_to_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traced.log");
        let logger = Arc::new(AsyncHydraLogger::builder().file(&path).build().unwrap());
        logger.initialize().await.unwrap();

        let store = logger.context().clone();
        let task_logger = Arc::clone(&logger);
        store
            .with_trace(Some("trace_test".into()), Some("corr_test".into()), async move {
                task_logger.info("traced message").await;
            })
            .await;

        logger.aclose().await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("trace=trace_test"));
        assert!(content.contains("corr=corr_test"));
    }

    #[tokio::test]
    async fn test_context_metadata_attached_to_records() {
        use crate::context::Context;
        use serde_json::json;

        let dir = tempdir().unwrap();
        let path = dir.path().join("ctx.log");
        let logger = Arc::new(AsyncHydraLogger::builder().file(&path).build().unwrap());
        logger.initialize().await.unwrap();

        let store = logger.context().clone();
        let task_logger = Arc::clone(&logger);
        let context = Context::new().with_metadata("request_id", json!("req-42"));
        store
            .with_context(context, async move {
                task_logger.info("with metadata").await;
            })
            .await;

        logger.aclose().await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("request_id=req-42"));
    }
}
