//! Aggregated health status and system metrics

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::System;

/// Default minimum interval between health probes (1 second)
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

const CRITICAL_MEMORY_PERCENT: f64 = 90.0;
const CRITICAL_CPU_PERCENT: f64 = 95.0;
const DROPPED_THRESHOLD: u64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub memory_available_mb: f64,
    pub process_memory_mb: f64,
    pub process_cpu_percent: f32,
}

/// Signals fed into the aggregate health decision.
#[derive(Debug, Clone, Default)]
pub struct HealthSignals {
    pub total_errors: u64,
    pub error_threshold: u64,
    pub queue_full: bool,
    pub dropped: u64,
}

struct HealthState {
    system: System,
    cached: Option<(Instant, Option<SystemMetrics>)>,
}

/// Caches a system probe and combines it with component signals into a
/// single liveness verdict. Probe failures are fail-open: missing system
/// metrics never mark the logger unhealthy on their own.
pub struct HealthMonitor {
    check_interval: Duration,
    state: Mutex<HealthState>,
    checks: AtomicU64,
    health_changes: AtomicU64,
    last_healthy: AtomicBool,
    start: Instant,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::with_check_interval(DEFAULT_HEALTH_CHECK_INTERVAL)
    }

    pub fn with_check_interval(check_interval: Duration) -> Self {
        Self {
            check_interval,
            state: Mutex::new(HealthState {
                system: System::new(),
                cached: None,
            }),
            checks: AtomicU64::new(0),
            health_changes: AtomicU64::new(0),
            last_healthy: AtomicBool::new(true),
            start: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start.elapsed()
    }

    /// Current system metrics, cached for the check interval. `None`
    /// when the probe fails.
    pub fn system_metrics(&self) -> Option<SystemMetrics> {
        let mut state = self.state.lock();

        if let Some((at, ref cached)) = state.cached {
            if at.elapsed() < self.check_interval {
                return cached.clone();
            }
        }

        self.checks.fetch_add(1, Ordering::Relaxed);
        let metrics = Self::probe(&mut state.system);
        state.cached = Some((Instant::now(), metrics.clone()));
        metrics
    }

    fn probe(system: &mut System) -> Option<SystemMetrics> {
        system.refresh_memory();
        system.refresh_cpu_usage();

        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        let memory_percent = system.used_memory() as f64 / total as f64 * 100.0;
        let memory_available_mb = system.available_memory() as f64 / (1024.0 * 1024.0);
        let cpu_percent = system.global_cpu_info().cpu_usage();

        let (process_memory_mb, process_cpu_percent) = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| {
                system.refresh_process(pid);
                system
                    .process(pid)
                    .map(|p| (p.memory() as f64 / (1024.0 * 1024.0), p.cpu_usage()))
            })
            .unwrap_or((0.0, 0.0));

        Some(SystemMetrics {
            cpu_percent,
            memory_percent,
            memory_available_mb,
            process_memory_mb,
            process_cpu_percent,
        })
    }

    /// Healthy means: errors under threshold, queue not full, drops under
    /// threshold, and (when the probe succeeds) memory below 90% and CPU
    /// below 95%.
    pub fn evaluate(&self, signals: &HealthSignals) -> bool {
        let threshold = signals.error_threshold.max(1);
        let mut healthy = signals.total_errors < threshold
            && !signals.queue_full
            && signals.dropped < DROPPED_THRESHOLD;

        if let Some(system) = self.system_metrics() {
            healthy = healthy
                && system.memory_percent < CRITICAL_MEMORY_PERCENT
                && f64::from(system.cpu_percent) < CRITICAL_CPU_PERCENT;
        }

        if self.last_healthy.swap(healthy, Ordering::Relaxed) != healthy {
            self.health_changes.fetch_add(1, Ordering::Relaxed);
        }
        healthy
    }

    pub fn reset(&self) {
        self.state.lock().cached = None;
        self.checks.store(0, Ordering::Relaxed);
        self.health_changes.store(0, Ordering::Relaxed);
        self.last_healthy.store(true, Ordering::Relaxed);
    }

    pub fn stats(&self) -> Value {
        json!({
            "checks": self.checks.load(Ordering::Relaxed),
            "health_changes": self.health_changes.load(Ordering::Relaxed),
            "check_interval_ms": self.check_interval.as_millis() as u64,
            "uptime": self.uptime().as_secs_f64(),
        })
    }
}
