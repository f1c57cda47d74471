//! Error recording with per-kind counters and callbacks

use crate::core::error::{ErrorKind, HydraError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Total errors after which a tracker reports unhealthy
pub const DEFAULT_ERROR_THRESHOLD: u64 = 100;

/// Callback invoked on every recorded error, in registration order.
pub type ErrorCallback = Arc<dyn Fn(ErrorKind, &HydraError) + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub errors_by_kind: HashMap<String, u64>,
    pub total_errors: u64,
    pub error_kinds: usize,
    pub callback_calls: u64,
    pub callback_errors: u64,
    pub secs_since_last_error: Option<f64>,
    pub uptime_secs: f64,
}

struct TrackerInner {
    counts: HashMap<ErrorKind, u64>,
    last_error_at: Option<Instant>,
    callbacks: Vec<(u64, ErrorCallback)>,
    next_callback_id: u64,
}

/// Thread-safe error accounting shared by a handler (or the logger) and
/// its writer task. Recording never fails and never panics outward.
pub struct ErrorTracker {
    inner: Mutex<TrackerInner>,
    total_errors: AtomicU64,
    callback_calls: AtomicU64,
    callback_errors: AtomicU64,
    threshold: AtomicU64,
    start: Instant,
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_ERROR_THRESHOLD)
    }

    pub fn with_threshold(threshold: u64) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                counts: HashMap::new(),
                last_error_at: None,
                callbacks: Vec::new(),
                next_callback_id: 0,
            }),
            total_errors: AtomicU64::new(0),
            callback_calls: AtomicU64::new(0),
            callback_errors: AtomicU64::new(0),
            threshold: AtomicU64::new(threshold),
            start: Instant::now(),
        }
    }

    /// Record an error under `kind` and notify callbacks in registration
    /// order. A panicking callback is contained and counted.
    pub fn record(&self, kind: ErrorKind, error: &HydraError) {
        let callbacks: Vec<ErrorCallback> = {
            let mut inner = self.inner.lock();
            *inner.counts.entry(kind).or_insert(0) += 1;
            inner.last_error_at = Some(Instant::now());
            inner.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        self.total_errors.fetch_add(1, Ordering::Relaxed);

        for callback in callbacks {
            self.callback_calls.fetch_add(1, Ordering::Relaxed);
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(kind, error)
            }));
            if outcome.is_err() {
                self.callback_errors.fetch_add(1, Ordering::Relaxed);
                eprintln!(
                    "[HYDRA ERROR] error callback panicked while handling a {} error",
                    kind
                );
            }
        }
    }

    /// Register a callback; the returned id removes it later.
    pub fn add_callback(&self, callback: ErrorCallback) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_callback_id;
        inner.next_callback_id += 1;
        inner.callbacks.push((id, callback));
        id
    }

    pub fn remove_callback(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.callbacks.len();
        inner.callbacks.retain(|(cb_id, _)| *cb_id != id);
        inner.callbacks.len() != before
    }

    pub fn clear_callbacks(&self) {
        self.inner.lock().callbacks.clear();
    }

    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.inner.lock().counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    pub fn is_healthy(&self) -> bool {
        self.total() < self.threshold.load(Ordering::Relaxed)
    }

    pub fn set_threshold(&self, threshold: u64) {
        self.threshold.store(threshold, Ordering::Relaxed);
    }

    pub fn threshold(&self) -> u64 {
        self.threshold.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.counts.clear();
        inner.last_error_at = None;
        drop(inner);
        self.total_errors.store(0, Ordering::Relaxed);
        self.callback_calls.store(0, Ordering::Relaxed);
        self.callback_errors.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ErrorStats {
        let inner = self.inner.lock();
        ErrorStats {
            errors_by_kind: inner
                .counts
                .iter()
                .map(|(kind, count)| (kind.as_str().to_string(), *count))
                .collect(),
            total_errors: self.total(),
            error_kinds: inner.counts.len(),
            callback_calls: self.callback_calls.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            secs_since_last_error: inner.last_error_at.map(|at| at.elapsed().as_secs_f64()),
            uptime_secs: self.start.elapsed().as_secs_f64(),
        }
    }
}
