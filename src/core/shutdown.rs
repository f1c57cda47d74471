//! Two-phase shutdown protocol (flush, then cleanup)

use crate::core::tasks::ShutdownSignal;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default timeout for draining pending records (5 seconds)
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
/// Default timeout for releasing resources (2 seconds)
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPhase {
    Running,
    Flushing,
    Cleaning,
    Done,
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownPhase::Running => "running",
            ShutdownPhase::Flushing => "flushing",
            ShutdownPhase::Cleaning => "cleaning",
            ShutdownPhase::Done => "done",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShutdownStats {
    pub phase: ShutdownPhase,
    pub shutdown_requested: bool,
    pub flush_timeout_ms: u64,
    pub cleanup_timeout_ms: u64,
    pub shutdowns: u64,
    pub flush_timeouts: u64,
    pub cleanup_timeouts: u64,
    pub sync_fallbacks: u64,
    pub uptime_secs: f64,
}

/// Drives a handler through `RUNNING -> FLUSHING -> CLEANING -> DONE`.
/// Phase transitions are one-way; both bounded phases always complete
/// (a timed-out phase is counted and warned, never retried).
pub struct ShutdownManager {
    phase: Mutex<ShutdownPhase>,
    signal: ShutdownSignal,
    flush_timeout: Duration,
    cleanup_timeout: Duration,
    gate: tokio::sync::Mutex<()>,
    shutdowns: AtomicU64,
    flush_timeouts: AtomicU64,
    cleanup_timeouts: AtomicU64,
    sync_fallbacks: AtomicU64,
    start: Instant,
}

impl ShutdownManager {
    pub fn new(signal: ShutdownSignal) -> Self {
        Self::with_timeouts(signal, DEFAULT_FLUSH_TIMEOUT, DEFAULT_CLEANUP_TIMEOUT)
    }

    pub fn with_timeouts(
        signal: ShutdownSignal,
        flush_timeout: Duration,
        cleanup_timeout: Duration,
    ) -> Self {
        Self {
            phase: Mutex::new(ShutdownPhase::Running),
            signal,
            flush_timeout,
            cleanup_timeout,
            gate: tokio::sync::Mutex::new(()),
            shutdowns: AtomicU64::new(0),
            flush_timeouts: AtomicU64::new(0),
            cleanup_timeouts: AtomicU64::new(0),
            sync_fallbacks: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.lock()
    }

    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.signal.is_signalled()
    }

    /// Run the two-phase protocol. `flush` drains pending records to the
    /// sink; `cleanup` releases resources. A second call (or a call after
    /// `force_sync`) is a no-op returning immediately.
    pub async fn run<Fl, Cl>(&self, flush: Fl, cleanup: Cl)
    where
        Fl: Future<Output = ()>,
        Cl: Future<Output = ()>,
    {
        let _gate = self.gate.lock().await;
        if *self.phase.lock() != ShutdownPhase::Running {
            return;
        }

        self.shutdowns.fetch_add(1, Ordering::Relaxed);
        *self.phase.lock() = ShutdownPhase::Flushing;
        self.signal.signal();

        if tokio::time::timeout(self.flush_timeout, flush).await.is_err() {
            self.flush_timeouts.fetch_add(1, Ordering::Relaxed);
            eprintln!(
                "[HYDRA WARNING] flush did not complete within {:?}",
                self.flush_timeout
            );
        }

        *self.phase.lock() = ShutdownPhase::Cleaning;
        if tokio::time::timeout(self.cleanup_timeout, cleanup)
            .await
            .is_err()
        {
            self.cleanup_timeouts.fetch_add(1, Ordering::Relaxed);
            eprintln!(
                "[HYDRA WARNING] cleanup did not complete within {:?}",
                self.cleanup_timeout
            );
        }

        *self.phase.lock() = ShutdownPhase::Done;
    }

    /// Skip the async phases entirely. Used from synchronous teardown
    /// paths; the caller performs its own sync drain and close.
    pub fn force_sync(&self) {
        self.sync_fallbacks.fetch_add(1, Ordering::Relaxed);
        self.signal.signal();
        *self.phase.lock() = ShutdownPhase::Done;
    }

    pub fn stats(&self) -> ShutdownStats {
        ShutdownStats {
            phase: self.phase(),
            shutdown_requested: self.is_shutdown_requested(),
            flush_timeout_ms: self.flush_timeout.as_millis() as u64,
            cleanup_timeout_ms: self.cleanup_timeout.as_millis() as u64,
            shutdowns: self.shutdowns.load(Ordering::Relaxed),
            flush_timeouts: self.flush_timeouts.load(Ordering::Relaxed),
            cleanup_timeouts: self.cleanup_timeouts.load(Ordering::Relaxed),
            sync_fallbacks: self.sync_fallbacks.load(Ordering::Relaxed),
            uptime_secs: self.start.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_phases_progress_to_done() {
        let manager = ShutdownManager::new(ShutdownSignal::new());
        assert_eq!(manager.phase(), ShutdownPhase::Running);

        let flushed = Arc::new(AtomicBool::new(false));
        let cleaned = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&flushed);
        let c = Arc::clone(&cleaned);

        manager
            .run(
                async move {
                    f.store(true, Ordering::SeqCst);
                },
                async move {
                    c.store(true, Ordering::SeqCst);
                },
            )
            .await;

        assert_eq!(manager.phase(), ShutdownPhase::Done);
        assert!(flushed.load(Ordering::SeqCst));
        assert!(cleaned.load(Ordering::SeqCst));
        assert!(manager.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_second_shutdown_is_noop() {
        let manager = ShutdownManager::new(ShutdownSignal::new());
        manager.run(async {}, async {}).await;

        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        manager
            .run(
                async move {
                    r.store(true, Ordering::SeqCst);
                },
                async {},
            )
            .await;

        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(manager.stats().shutdowns, 1);
    }

    #[tokio::test]
    async fn test_flush_timeout_still_reaches_done() {
        let manager = ShutdownManager::with_timeouts(
            ShutdownSignal::new(),
            Duration::from_millis(20),
            Duration::from_millis(20),
        );

        manager
            .run(
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                },
                async {},
            )
            .await;

        assert_eq!(manager.phase(), ShutdownPhase::Done);
        assert_eq!(manager.stats().flush_timeouts, 1);
    }

    #[tokio::test]
    async fn test_force_sync_skips_async_phases() {
        let manager = ShutdownManager::new(ShutdownSignal::new());
        manager.force_sync();
        assert_eq!(manager.phase(), ShutdownPhase::Done);
        assert_eq!(manager.stats().sync_fallbacks, 1);
        assert!(manager.is_shutdown_requested());

        // A later async shutdown is a no-op.
        manager.run(async {}, async {}).await;
        assert_eq!(manager.stats().shutdowns, 0);
    }
}
