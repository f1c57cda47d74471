//! Shared shutdown signalling and writer-task tracking

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Default timeout for joining tracked tasks during shutdown (2 seconds)
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// One-way latch observed by producers, queues, and writer loops.
///
/// Clones share the same latch. Once signalled it stays signalled.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug, Default)]
struct SignalInner {
    set: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        if !self.inner.set.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_signalled(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Wait until the signal is set. Returns immediately if already set.
    pub async fn wait(&self) {
        loop {
            if self.is_signalled() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering the waiter: notify_waiters does
            // not store a permit for late arrivals.
            if self.is_signalled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStats {
    pub active: usize,
    pub spawned: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub timeout_shutdowns: u64,
    pub shutdown_timeout_ms: u64,
    pub uptime_secs: f64,
}

/// Tracks spawned long-running tasks (chiefly writer loops) and joins
/// them under a deadline at shutdown.
pub struct TaskManager {
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: ShutdownSignal,
    shutdown_timeout: Duration,
    spawned: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    timeout_shutdowns: AtomicU64,
    start: Instant,
}

impl TaskManager {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self::with_timeout(shutdown, DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_timeout(shutdown: ShutdownSignal, shutdown_timeout: Duration) -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            shutdown,
            shutdown_timeout,
            spawned: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            timeout_shutdowns: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Spawn and track a task. Finished handles are pruned opportunistically.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.prune();
        let handle = tokio::spawn(future);
        self.spawned.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().push(handle);
    }

    fn prune(&self) {
        let mut handles = self.handles.lock();
        let before = handles.len();
        handles.retain(|h| !h.is_finished());
        let finished = before - handles.len();
        if finished > 0 {
            self.completed.fetch_add(finished as u64, Ordering::Relaxed);
        }
    }

    pub fn active_count(&self) -> usize {
        self.prune();
        self.handles.lock().len()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_signalled()
    }

    /// Signal shutdown and join every tracked task under the configured
    /// timeout. Tasks observe the signal cooperatively (finishing their
    /// current I/O first); whatever misses the deadline is aborted. The
    /// tracked set is cleared regardless.
    pub async fn shutdown(&self) {
        self.shutdown.signal();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        if handles.is_empty() {
            return;
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let mut stragglers: Vec<JoinHandle<()>> = Vec::new();
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => {
                    self.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => stragglers.push(handle),
            }
        }

        if !stragglers.is_empty() {
            self.timeout_shutdowns.fetch_add(1, Ordering::Relaxed);
            eprintln!(
                "[HYDRA WARNING] {} writer task(s) did not stop within {:?}; cancelling",
                stragglers.len(),
                self.shutdown_timeout
            );
            for handle in stragglers {
                handle.abort();
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                // An aborted task resolves promptly; this join cannot hang.
                let _ = handle.await;
            }
        }
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            active: self.active_count(),
            spawned: self.spawned.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            timeout_shutdowns: self.timeout_shutdowns.load(Ordering::Relaxed),
            shutdown_timeout_ms: self.shutdown_timeout.as_millis() as u64,
            uptime_secs: self.start.elapsed().as_secs_f64(),
        }
    }
}
