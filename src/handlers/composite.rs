//! Composite handler: fan-out to child handlers with error isolation

use super::{Handler, HandlerStats};
use crate::core::error::{ErrorKind, HydraError, Result};
use crate::core::error_tracker::ErrorTracker;
use crate::core::record::LogRecord;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

struct ChildEntry {
    handler: Arc<dyn Handler>,
    success: AtomicU64,
    error: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ChildEntry {
    fn new(handler: Arc<dyn Handler>) -> Arc<Self> {
        Arc::new(Self {
            handler,
            success: AtomicU64::new(0),
            error: AtomicU64::new(0),
            last_error: Mutex::new(None),
        })
    }

    fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, error: &HydraError) {
        self.error.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(error.to_string());
    }
}

/// Dispatches every record to an ordered list of child handlers, in
/// parallel or sequentially. A failing child is recorded and never
/// suppresses its siblings (in sequential mode, `fail_fast` may stop
/// the remaining children) nor propagates to the caller.
pub struct CompositeHandler {
    children: RwLock<Vec<Arc<ChildEntry>>>,
    parallel: bool,
    fail_fast: bool,
    errors: Arc<ErrorTracker>,
    start: Instant,
}

impl CompositeHandler {
    pub fn new(handlers: Vec<Arc<dyn Handler>>, parallel: bool, fail_fast: bool) -> Self {
        Self {
            children: RwLock::new(handlers.into_iter().map(ChildEntry::new).collect()),
            parallel,
            fail_fast,
            errors: Arc::new(ErrorTracker::new()),
            start: Instant::now(),
        }
    }

    pub fn add_child(&self, handler: Arc<dyn Handler>) {
        self.children.write().push(ChildEntry::new(handler));
    }

    pub fn remove_child(&self, handler: &Arc<dyn Handler>) -> bool {
        let mut children = self.children.write();
        let before = children.len();
        children.retain(|entry| !Arc::ptr_eq(&entry.handler, handler));
        children.len() != before
    }

    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    pub fn children(&self) -> Vec<Arc<dyn Handler>> {
        self.children
            .read()
            .iter()
            .map(|entry| Arc::clone(&entry.handler))
            .collect()
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    fn entries(&self) -> Vec<Arc<ChildEntry>> {
        self.children.read().clone()
    }

    async fn emit_parallel(&self, record: &LogRecord) {
        let entries = self.entries();
        let mut joins = Vec::with_capacity(entries.len());
        for entry in entries {
            let task_entry = Arc::clone(&entry);
            let task_record = record.clone();
            let join =
                tokio::spawn(async move { task_entry.handler.emit_async(&task_record).await });
            joins.push((entry, join));
        }

        // All children run to completion regardless of individual errors.
        for (entry, join) in joins {
            let outcome = match join.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(HydraError::handler(
                    entry.handler.name(),
                    "emit",
                    join_error.to_string(),
                )),
            };
            match outcome {
                Ok(()) => entry.record_success(),
                Err(error) => {
                    entry.record_error(&error);
                    self.errors.record(ErrorKind::HandlerEmit, &error);
                }
            }
        }
    }

    async fn emit_sequential(&self, record: &LogRecord) {
        for entry in self.entries() {
            match entry.handler.emit_async(record).await {
                Ok(()) => entry.record_success(),
                Err(error) => {
                    entry.record_error(&error);
                    self.errors.record(ErrorKind::HandlerEmit, &error);
                    if self.fail_fast {
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Handler for CompositeHandler {
    fn name(&self) -> &str {
        "composite"
    }

    async fn initialize(&self) -> Result<()> {
        for entry in self.entries() {
            if let Err(error) = entry.handler.initialize().await {
                self.errors.record(ErrorKind::HandlerInit, &error);
            }
        }
        Ok(())
    }

    async fn emit_async(&self, record: &LogRecord) -> Result<()> {
        if self.child_count() == 0 {
            return Ok(());
        }
        if self.parallel {
            self.emit_parallel(record).await;
        } else {
            self.emit_sequential(record).await;
        }
        Ok(())
    }

    async fn aclose(&self) -> Result<()> {
        for entry in self.entries() {
            if let Err(error) = entry.handler.aclose().await {
                self.errors.record(ErrorKind::HandlerEmit, &error);
            }
        }
        Ok(())
    }

    fn force_sync_shutdown(&self) {
        for entry in self.entries() {
            entry.handler.force_sync_shutdown();
        }
    }

    fn stats(&self) -> HandlerStats {
        let mut aggregate = HandlerStats {
            errors_by_kind: self.errors.stats().errors_by_kind,
            uptime_secs: self.start.elapsed().as_secs_f64(),
            ..Default::default()
        };
        for entry in self.entries() {
            let child = entry.handler.stats();
            aggregate.enqueued += child.enqueued;
            aggregate.dequeued += child.dequeued;
            aggregate.dropped += child.dropped;
            aggregate.sync_fallbacks += child.sync_fallbacks;
            aggregate.queue_size += child.queue_size;
            aggregate.writer_alive |= child.writer_alive;
        }
        aggregate
    }

    fn is_healthy(&self) -> bool {
        self.errors.is_healthy() && self.entries().iter().all(|entry| entry.handler.is_healthy())
    }

    fn health_status(&self) -> Value {
        let children: Vec<Value> = self
            .entries()
            .iter()
            .map(|entry| {
                json!({
                    "handler": entry.handler.health_status(),
                    "success_count": entry.success.load(Ordering::Relaxed),
                    "error_count": entry.error.load(Ordering::Relaxed),
                    "last_error": entry.last_error.lock().clone(),
                })
            })
            .collect();
        json!({
            "type": self.name(),
            "parallel_execution": self.parallel,
            "fail_fast": self.fail_fast,
            "handler_count": self.child_count(),
            "error_stats": self.errors.stats(),
            "children": children,
            "uptime": self.start.elapsed().as_secs_f64(),
            "is_healthy": self.is_healthy(),
        })
    }
}
