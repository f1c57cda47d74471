//! Bounded multi-producer queue with configurable overflow policy
//!
//! Each handler owns one queue drained by a single writer task. Producers
//! are safe to share; the single-consumer assumption is not enforced.

use crate::core::error::{HydraError, Result};
use crate::core::tasks::ShutdownSignal;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Default timeout for `put` operations (100 ms)
pub const DEFAULT_PUT_TIMEOUT: Duration = Duration::from_millis(100);
/// Default timeout for `get` operations (1 second)
pub const DEFAULT_GET_TIMEOUT: Duration = Duration::from_secs(1);

/// Rule applied when a full queue cannot accept a new record within the
/// put timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Displace the single oldest buffered record to admit the new one.
    #[default]
    DropOldest,
    /// Fail the put with `QueueFull`; the caller keeps responsibility
    /// for the record (handlers fall back to a synchronous write).
    Error,
    /// Wait for space. A blocked producer observes the shutdown signal
    /// and wakes with `QueueFull`.
    Block,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::DropOldest => write!(f, "drop_oldest"),
            OverflowPolicy::Error => write!(f, "error"),
            OverflowPolicy::Block => write!(f, "block"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub size: usize,
    pub capacity: usize,
    pub policy: OverflowPolicy,
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub full_events: u64,
    pub is_empty: bool,
    pub is_full: bool,
    pub put_timeout_ms: u64,
    pub get_timeout_ms: u64,
    pub uptime_secs: f64,
}

#[derive(Debug, Clone, Copy)]
struct QueueConfig {
    policy: OverflowPolicy,
    put_timeout: Duration,
    get_timeout: Duration,
}

/// Fixed-capacity buffer between producers and a handler's writer task.
///
/// Counter accounting: every completed `put` increments exactly one of
/// `enqueued` (record admitted, nothing lost) or `dropped` (record
/// admitted by displacing the oldest). Records removed by `clear` are
/// counted as dropped. No record is lost without a `dropped` increment.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    config: Mutex<QueueConfig>,
    not_empty: Notify,
    not_full: Notify,
    shutdown: ShutdownSignal,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
    full_events: AtomicU64,
    start: Mutex<Instant>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy, shutdown: ShutdownSignal) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            config: Mutex::new(QueueConfig {
                policy,
                put_timeout: DEFAULT_PUT_TIMEOUT,
                get_timeout: DEFAULT_GET_TIMEOUT,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            shutdown,
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            full_events: AtomicU64::new(0),
            start: Mutex::new(Instant::now()),
        }
    }

    #[must_use]
    pub fn with_timeouts(self, put_timeout: Duration, get_timeout: Duration) -> Self {
        {
            let mut config = self.config.lock();
            config.put_timeout = put_timeout;
            config.get_timeout = get_timeout;
        }
        self
    }

    fn config_snapshot(&self) -> QueueConfig {
        *self.config.lock()
    }

    /// Enqueue a record, waiting up to the put timeout for space. On a
    /// still-full queue the overflow policy decides the outcome. Fails
    /// with `ShuttingDown` once the shutdown signal is set.
    pub async fn put(&self, item: T) -> Result<()> {
        if self.shutdown.is_signalled() {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Err(HydraError::ShuttingDown);
        }

        let config = self.config_snapshot();
        let mut item = item;
        let mut hit_full = false;
        let deadline = tokio::time::Instant::now() + config.put_timeout;

        loop {
            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(rejected) => item = rejected,
            }
            if !hit_full {
                self.full_events.fetch_add(1, Ordering::Relaxed);
                hit_full = true;
            }

            if config.policy == OverflowPolicy::Block {
                tokio::select! {
                    _ = self.not_full.notified() => continue,
                    _ = self.shutdown.wait() => {
                        self.errors.fetch_add(1, Ordering::Relaxed);
                        return Err(HydraError::queue_full(self.size(), self.capacity));
                    }
                }
            }

            match tokio::time::timeout_at(deadline, self.not_full.notified()).await {
                Ok(_) => continue,
                Err(_) => {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }

        // Put timed out with the queue still full; apply the policy.
        match config.policy {
            OverflowPolicy::DropOldest => {
                self.push_displacing(item);
                Ok(())
            }
            OverflowPolicy::Error => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(HydraError::queue_full(self.size(), self.capacity))
            }
            OverflowPolicy::Block => unreachable!("block waits for space or shutdown"),
        }
    }

    fn try_push(&self, item: T) -> std::result::Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        drop(items);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();
        Ok(())
    }

    fn push_displacing(&self, item: T) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity && items.pop_front().is_some() {
            items.push_back(item);
            drop(items);
            self.dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            // A consumer drained the queue between the timeout and the
            // drop step; the new item goes in normally.
            items.push_back(item);
            drop(items);
            self.enqueued.fetch_add(1, Ordering::Relaxed);
        }
        self.not_empty.notify_one();
    }

    /// Dequeue a record, waiting up to the get timeout. Returns `None` on
    /// timeout so the writer loop can check shutdown and continue.
    pub async fn get(&self) -> Option<T> {
        let config = self.config_snapshot();
        let deadline = tokio::time::Instant::now() + config.get_timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            match tokio::time::timeout_at(deadline, self.not_empty.notified()).await {
                Ok(_) => continue,
                Err(_) => {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }
    }

    fn try_pop(&self) -> Option<T> {
        let mut items = self.items.lock();
        let item = items.pop_front()?;
        drop(items);
        self.dequeued.fetch_add(1, Ordering::Relaxed);
        self.not_full.notify_one();
        Some(item)
    }

    /// Non-blocking put. The rejected item is handed back on a full queue.
    pub fn put_nowait(&self, item: T) -> std::result::Result<(), T> {
        match self.try_push(item) {
            Ok(()) => Ok(()),
            Err(rejected) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(rejected)
            }
        }
    }

    /// Non-blocking get.
    pub fn get_nowait(&self) -> Result<T> {
        self.try_pop().ok_or(HydraError::QueueEmpty)
    }

    pub fn size(&self) -> usize {
        self.items.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.lock().len() >= self.capacity
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Remove all buffered records, counting each as dropped.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let removed = items.len();
        items.clear();
        drop(items);
        if removed > 0 {
            self.dropped.fetch_add(removed as u64, Ordering::Relaxed);
            self.not_full.notify_waiters();
        }
        removed
    }

    /// Adjust policy and timeouts; applies to subsequent operations only.
    pub fn reconfigure(
        &self,
        policy: Option<OverflowPolicy>,
        put_timeout: Option<Duration>,
        get_timeout: Option<Duration>,
    ) {
        let mut config = self.config.lock();
        if let Some(policy) = policy {
            config.policy = policy;
        }
        if let Some(put_timeout) = put_timeout {
            config.put_timeout = put_timeout;
        }
        if let Some(get_timeout) = get_timeout {
            config.get_timeout = get_timeout;
        }
    }

    pub fn reset_stats(&self) {
        self.enqueued.store(0, Ordering::Relaxed);
        self.dequeued.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.full_events.store(0, Ordering::Relaxed);
        *self.start.lock() = Instant::now();
    }

    pub fn stats(&self) -> QueueStats {
        let config = self.config_snapshot();
        let size = self.size();
        QueueStats {
            size,
            capacity: self.capacity,
            policy: config.policy,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            full_events: self.full_events.load(Ordering::Relaxed),
            is_empty: size == 0,
            is_full: size >= self.capacity,
            put_timeout_ms: config.put_timeout.as_millis() as u64,
            get_timeout_ms: config.get_timeout.as_millis() as u64,
            uptime_secs: self.start.lock().elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(capacity: usize, policy: OverflowPolicy) -> BoundedQueue<u32> {
        BoundedQueue::new(capacity, policy, ShutdownSignal::new())
            .with_timeouts(Duration::from_millis(10), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let q = queue(4, OverflowPolicy::DropOldest);
        q.put(1).await.unwrap();
        q.put(2).await.unwrap();
        assert_eq!(q.size(), 2);
        assert_eq!(q.get().await, Some(1));
        assert_eq!(q.get().await, Some(2));
        assert_eq!(q.get().await, None);

        let stats = q.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.dequeued, 2);
        assert_eq!(stats.timeouts, 1);
    }

    #[tokio::test]
    async fn test_drop_oldest_boundary() {
        let q = queue(1, OverflowPolicy::DropOldest);
        q.put(1).await.unwrap();
        q.put(2).await.unwrap();

        assert_eq!(q.size(), 1);
        assert_eq!(q.dropped_count(), 1);
        // The survivor is the newest record.
        assert_eq!(q.get_nowait().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_drop_oldest_accounting() {
        let q = queue(3, OverflowPolicy::DropOldest);
        for i in 0..10 {
            q.put(i).await.unwrap();
        }
        let stats = q.stats();
        assert_eq!(stats.enqueued + stats.dropped, 10);
        assert_eq!(stats.size, 3);
        assert_eq!(stats.dropped, 7);
    }

    #[tokio::test]
    async fn test_error_policy() {
        let q = queue(1, OverflowPolicy::Error);
        q.put(1).await.unwrap();
        let err = q.put(2).await.unwrap_err();
        assert!(matches!(err, HydraError::QueueFull { .. }));
        assert_eq!(q.size(), 1);
        assert_eq!(q.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_space() {
        let q = std::sync::Arc::new(queue(1, OverflowPolicy::Block));
        q.put(1).await.unwrap();

        let producer = {
            let q = std::sync::Arc::clone(&q);
            tokio::spawn(async move { q.put(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(q.get().await, Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(q.get_nowait().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_block_policy_observes_shutdown() {
        let shutdown = ShutdownSignal::new();
        let q = std::sync::Arc::new(
            BoundedQueue::new(1, OverflowPolicy::Block, shutdown.clone())
                .with_timeouts(Duration::from_millis(10), Duration::from_millis(10)),
        );
        q.put(1).await.unwrap();

        let producer = {
            let q = std::sync::Arc::clone(&q);
            tokio::spawn(async move { q.put(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.signal();

        let result = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("blocked producer must wake on shutdown")
            .unwrap();
        assert!(matches!(result, Err(HydraError::QueueFull { .. })));
    }

    #[tokio::test]
    async fn test_put_after_shutdown_rejected() {
        let shutdown = ShutdownSignal::new();
        let q: BoundedQueue<u32> = BoundedQueue::new(4, OverflowPolicy::DropOldest, shutdown.clone());
        shutdown.signal();
        assert!(matches!(q.put(1).await, Err(HydraError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_nowait_operations() {
        let q = queue(1, OverflowPolicy::Error);
        assert!(matches!(q.get_nowait(), Err(HydraError::QueueEmpty)));
        q.put_nowait(1).unwrap();
        assert_eq!(q.put_nowait(2).unwrap_err(), 2);
        assert_eq!(q.get_nowait().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_counts_dropped() {
        let q = queue(4, OverflowPolicy::DropOldest);
        q.put(1).await.unwrap();
        q.put(2).await.unwrap();
        assert_eq!(q.clear(), 2);
        assert_eq!(q.dropped_count(), 2);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_reconfigure_applies_to_later_puts() {
        let q = queue(1, OverflowPolicy::Error);
        q.put(1).await.unwrap();
        assert!(q.put(2).await.is_err());

        q.reconfigure(Some(OverflowPolicy::DropOldest), None, None);
        q.put(3).await.unwrap();
        assert_eq!(q.get_nowait().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let q = queue(2, OverflowPolicy::DropOldest);
        q.put(1).await.unwrap();
        q.reset_stats();
        let stats = q.stats();
        assert_eq!(stats.enqueued, 0);
        assert_eq!(stats.size, 1);
    }
}
