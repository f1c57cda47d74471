//! Async console handler: bounded queue drained onto stdout or stderr

use super::{default_formatter, Formatter, Handler, HandlerStats};
use crate::core::error::{ErrorKind, HydraError, Result};
use crate::core::error_tracker::ErrorTracker;
use crate::core::level::LogLevel;
use crate::core::memory::{MemoryMonitor, DEFAULT_MEMORY_THRESHOLD};
use crate::core::queue::{BoundedQueue, OverflowPolicy};
use crate::core::record::LogRecord;
use crate::core::shutdown::ShutdownManager;
use crate::core::tasks::{ShutdownSignal, TaskManager};
use async_trait::async_trait;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Target stream for console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleStream {
    Stdout,
    #[default]
    Stderr,
}

impl ConsoleStream {
    fn is_terminal(self) -> bool {
        match self {
            ConsoleStream::Stdout => std::io::stdout().is_terminal(),
            ConsoleStream::Stderr => std::io::stderr().is_terminal(),
        }
    }

    fn write_lines<S: AsRef<str>>(self, lines: &[S]) -> Result<()> {
        use std::io::Write;
        let mut buf = Vec::new();
        for line in lines {
            buf.extend_from_slice(line.as_ref().as_bytes());
            buf.push(b'\n');
        }
        match self {
            ConsoleStream::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(&buf)?;
                out.flush()?;
            }
            ConsoleStream::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(&buf)?;
                err.flush()?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ConsoleStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsoleStream::Stdout => write!(f, "stdout"),
            ConsoleStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Writes formatted records to a text stream, optionally colored per
/// level. Stream writes are delegated to the blocking executor so the
/// async runtime is never stalled on a slow console.
///
/// Colors apply only when requested AND the stream is a terminal,
/// decided once at construction.
pub struct ConsoleHandler {
    stream: ConsoleStream,
    use_colors: bool,
    queue: Arc<BoundedQueue<String>>,
    memory: Arc<MemoryMonitor>,
    errors: Arc<ErrorTracker>,
    shutdown: ShutdownManager,
    tasks: TaskManager,
    formatter: Formatter,
    sync_fallbacks: AtomicU64,
    initialized: AtomicBool,
    start: Instant,
}

impl Default for ConsoleHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleHandler {
    pub fn new() -> Self {
        Self::with_options(
            ConsoleStream::default(),
            true,
            super::file::DEFAULT_MAX_QUEUE_SIZE,
            DEFAULT_MEMORY_THRESHOLD,
            OverflowPolicy::default(),
        )
    }

    pub fn with_options(
        stream: ConsoleStream,
        use_colors: bool,
        max_queue_size: usize,
        memory_threshold: f64,
        policy: OverflowPolicy,
    ) -> Self {
        let signal = ShutdownSignal::new();
        Self {
            stream,
            use_colors: use_colors && stream.is_terminal(),
            queue: Arc::new(BoundedQueue::new(max_queue_size, policy, signal.clone())),
            memory: Arc::new(MemoryMonitor::new(memory_threshold)),
            errors: Arc::new(ErrorTracker::new()),
            tasks: TaskManager::new(signal.clone()),
            shutdown: ShutdownManager::new(signal),
            formatter: default_formatter(),
            sync_fallbacks: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn stream(&self) -> ConsoleStream {
        self.stream
    }

    pub fn colors_enabled(&self) -> bool {
        self.use_colors
    }

    pub fn sync_fallbacks(&self) -> u64 {
        self.sync_fallbacks.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    fn render(&self, record: &LogRecord) -> String {
        let line = (self.formatter)(record);
        if self.use_colors {
            colorize(line, record.level)
        } else {
            line
        }
    }

    fn spawn_writer(&self) {
        let queue = Arc::clone(&self.queue);
        let errors = Arc::clone(&self.errors);
        let stream = self.stream;
        let signal = self.shutdown.signal().clone();
        self.tasks
            .spawn(async move { writer_loop(stream, queue, errors, signal).await });
    }

    fn write_record_sync(&self, line: &str) {
        self.sync_fallbacks.fetch_add(1, Ordering::Relaxed);
        if let Err(error) = self.stream.write_lines(&[line]) {
            self.errors.record(ErrorKind::SyncWrite, &error);
        }
    }
}

fn colorize(line: String, level: LogLevel) -> String {
    line.color(level.color_code()).to_string()
}

async fn writer_loop(
    stream: ConsoleStream,
    queue: Arc<BoundedQueue<String>>,
    errors: Arc<ErrorTracker>,
    shutdown: ShutdownSignal,
) {
    loop {
        if shutdown.is_signalled() {
            break;
        }
        let line = tokio::select! {
            _ = shutdown.wait() => break,
            item = queue.get() => match item {
                Some(line) => line,
                None => continue,
            },
        };

        let outcome = tokio::task::spawn_blocking(move || stream.write_lines(&[line]))
            .await
            .unwrap_or_else(|join_error| Err(HydraError::writer(join_error.to_string())));
        if let Err(error) = outcome {
            errors.record(ErrorKind::ConsoleWrite, &error);
        }
    }
}

#[async_trait]
impl Handler for ConsoleHandler {
    fn name(&self) -> &str {
        "console"
    }

    async fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.spawn_writer();
        Ok(())
    }

    async fn emit_async(&self, record: &LogRecord) -> Result<()> {
        let line = self.render(record);

        if !self.memory.check() {
            self.write_record_sync(&line);
            return Ok(());
        }

        if let Err(error) = self.queue.put(line.clone()).await {
            self.errors.record(ErrorKind::QueuePut, &error);
            self.write_record_sync(&line);
        }
        Ok(())
    }

    async fn aclose(&self) -> Result<()> {
        let flush = async {
            let mut pending = Vec::new();
            while let Ok(line) = self.queue.get_nowait() {
                pending.push(line);
            }
            if pending.is_empty() {
                return;
            }
            let stream = self.stream;
            let outcome =
                tokio::task::spawn_blocking(move || stream.write_lines(&pending)).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => self.errors.record(ErrorKind::SyncWrite, &error),
                Err(join_error) => self.errors.record(
                    ErrorKind::SyncWrite,
                    &HydraError::writer(join_error.to_string()),
                ),
            }
        };
        let cleanup = async {
            self.tasks.shutdown().await;
            self.queue.clear();
        };
        self.shutdown.run(flush, cleanup).await;
        Ok(())
    }

    fn force_sync_shutdown(&self) {
        self.shutdown.force_sync();
        let mut pending = Vec::new();
        while let Ok(line) = self.queue.get_nowait() {
            pending.push(line);
        }
        if !pending.is_empty() {
            if let Err(error) = self.stream.write_lines(&pending) {
                self.errors.record(ErrorKind::SyncWrite, &error);
            }
        }
    }

    fn stats(&self) -> HandlerStats {
        let queue = self.queue.stats();
        HandlerStats {
            enqueued: queue.enqueued,
            dequeued: queue.dequeued,
            dropped: queue.dropped,
            sync_fallbacks: self.sync_fallbacks.load(Ordering::Relaxed),
            errors_by_kind: self.errors.stats().errors_by_kind,
            queue_size: queue.size,
            writer_alive: self.tasks.active_count() > 0,
            uptime_secs: self.start.elapsed().as_secs_f64(),
        }
    }

    fn is_healthy(&self) -> bool {
        self.errors.is_healthy() && !self.queue.is_full()
    }

    fn health_status(&self) -> Value {
        let queue = self.queue.stats();
        json!({
            "type": self.name(),
            "stream": self.stream.to_string(),
            "use_colors": self.use_colors,
            "queue_stats": queue,
            "memory_stats": self.memory.stats(),
            "error_stats": self.errors.stats(),
            "shutdown": self.shutdown.stats(),
            "sync_fallbacks": self.sync_fallbacks.load(Ordering::Relaxed),
            "dropped_messages": queue.dropped,
            "writer_alive": self.tasks.active_count() > 0,
            "uptime": self.start.elapsed().as_secs_f64(),
            "is_healthy": self.is_healthy(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: &str) -> LogRecord {
        LogRecord::new(LogLevel::Info, "TEST", message)
    }

    #[tokio::test]
    async fn test_emit_and_close() {
        let handler = ConsoleHandler::with_options(
            ConsoleStream::Stderr,
            false,
            16,
            DEFAULT_MEMORY_THRESHOLD,
            OverflowPolicy::DropOldest,
        );
        handler.initialize().await.unwrap();
        for i in 0..10 {
            handler
                .emit_async(&record(&format!("console {}", i)))
                .await
                .unwrap();
        }
        handler.aclose().await.unwrap();

        let stats = handler.stats();
        assert_eq!(stats.enqueued + stats.dropped + stats.sync_fallbacks, 10);
        assert!(!stats.writer_alive);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let handler = ConsoleHandler::new();
        handler.initialize().await.unwrap();
        handler.initialize().await.unwrap();
        // Only one writer task was started.
        assert!(handler.stats().writer_alive);
        assert_eq!(handler.tasks.stats().spawned, 1);
        handler.aclose().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_pressure_sync_fallback() {
        let handler = ConsoleHandler::with_options(
            ConsoleStream::Stderr,
            false,
            16,
            0.000_1,
            OverflowPolicy::DropOldest,
        );
        handler.initialize().await.unwrap();
        for _ in 0..3 {
            handler.emit_async(&record("pressured")).await.unwrap();
        }
        assert_eq!(handler.sync_fallbacks(), 3);
        handler.aclose().await.unwrap();
    }

    #[test]
    fn test_colorize_preserves_message() {
        // Forced colors still carry the full line text.
        colored::control::set_override(true);
        let colored_line = colorize("payload text".to_string(), LogLevel::Error);
        assert!(colored_line.contains("payload text"));
        colored::control::unset_override();
    }

    #[test]
    fn test_stream_parsing_serde() {
        let stream: ConsoleStream = serde_json::from_str("\"stdout\"").unwrap();
        assert_eq!(stream, ConsoleStream::Stdout);
        let stream: ConsoleStream = serde_json::from_str("\"stderr\"").unwrap();
        assert_eq!(stream, ConsoleStream::Stderr);
    }
}
