//! Async file handler: bounded queue drained into a durable append sink

use super::{default_formatter, Formatter, Handler, HandlerStats};
use crate::core::error::{ErrorKind, HydraError, Result};
use crate::core::error_tracker::ErrorTracker;
use crate::core::memory::{MemoryMonitor, DEFAULT_MEMORY_THRESHOLD};
use crate::core::queue::{BoundedQueue, OverflowPolicy};
use crate::core::record::LogRecord;
use crate::core::shutdown::ShutdownManager;
use crate::core::tasks::{ShutdownSignal, TaskManager};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Default queue capacity per handler
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Appends formatted records to a file, one per line. A single writer
/// task drains the queue; memory pressure and queue failures divert the
/// record onto the synchronous fallback path so it is never lost.
pub struct FileHandler {
    path: PathBuf,
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

impl FileHandler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(
            path,
            DEFAULT_MAX_QUEUE_SIZE,
            DEFAULT_MEMORY_THRESHOLD,
            OverflowPolicy::default(),
        )
    }

    pub fn with_options(
        path: impl Into<PathBuf>,
        max_queue_size: usize,
        memory_threshold: f64,
        policy: OverflowPolicy,
    ) -> Self {
        let signal = ShutdownSignal::new();
        Self {
            path: path.into(),
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

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sync_fallbacks(&self) -> u64 {
        self.sync_fallbacks.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    pub fn queue(&self) -> &BoundedQueue<String> {
        &self.queue
    }

    fn spawn_writer(&self) {
        let queue = Arc::clone(&self.queue);
        let errors = Arc::clone(&self.errors);
        let path = self.path.clone();
        let signal = self.shutdown.signal().clone();
        self.tasks
            .spawn(async move { writer_loop(path, queue, errors, signal).await });
    }

    fn write_record_sync(&self, line: &str) {
        self.sync_fallbacks.fetch_add(1, Ordering::Relaxed);
        if let Err(error) = append_lines_sync(&self.path, &[line]) {
            self.errors.record(ErrorKind::SyncWrite, &error);
        }
    }
}

async fn writer_loop(
    path: PathBuf,
    queue: Arc<BoundedQueue<String>>,
    errors: Arc<ErrorTracker>,
    shutdown: ShutdownSignal,
) {
    let mut file = match open_append(&path).await {
        Ok(file) => Some(file),
        Err(error) => {
            errors.record(ErrorKind::WriterSetup, &error);
            None
        }
    };

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

        let outcome = match file.as_mut() {
            Some(file) => append_line(file, &line).await,
            // Writer setup failed; fall back to blocking appends so the
            // record still reaches the sink.
            None => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || append_lines_sync(&path, &[line]))
                    .await
                    .unwrap_or_else(|join_error| {
                        Err(HydraError::writer(join_error.to_string()))
                    })
            }
        };
        if let Err(error) = outcome {
            errors.record(ErrorKind::Writer, &error);
        }
    }
}

async fn open_append(path: &Path) -> Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

async fn append_line(file: &mut tokio::fs::File, line: &str) -> Result<()> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    file.write_all(&buf).await?;
    file.flush().await?;
    Ok(())
}

fn append_lines_sync<S: AsRef<str>>(path: &Path, lines: &[S]) -> Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    for line in lines {
        let line = line.as_ref();
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf)?;
    }
    file.flush()?;
    Ok(())
}

#[async_trait]
impl Handler for FileHandler {
    fn name(&self) -> &str {
        "file"
    }

    async fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        self.spawn_writer();
        Ok(())
    }

    async fn emit_async(&self, record: &LogRecord) -> Result<()> {
        let line = (self.formatter)(record);

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
            let path = self.path.clone();
            let outcome =
                tokio::task::spawn_blocking(move || append_lines_sync(&path, &pending)).await;
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
            // Anything still buffered is lost and counted as dropped.
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
            if let Err(error) = append_lines_sync(&self.path, &pending) {
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
        if !self.errors.is_healthy() || self.queue.is_full() {
            return false;
        }
        // The sink must still be writable.
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .is_ok()
    }

    fn health_status(&self) -> Value {
        let queue = self.queue.stats();
        json!({
            "type": self.name(),
            "filename": self.path.display().to_string(),
            "file_exists": self.path.exists(),
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
