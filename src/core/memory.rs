//! System-memory monitoring for producer backpressure

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::System;

/// Default memory-usage threshold percentage
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 70.0;
/// Default minimum interval between probes (5 seconds)
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub current_percent: f64,
    pub peak_percent: f64,
    pub max_threshold: f64,
    pub check_interval_ms: u64,
    pub probes: u64,
    pub warnings: u64,
    pub probe_errors: u64,
    pub uptime_secs: f64,
}

struct ProbeState {
    system: System,
    last_check: Option<Instant>,
    last_result: bool,
    warned: bool,
    last_percent: f64,
    peak_percent: f64,
}

/// Cached system-memory probe with a hysteresis threshold.
///
/// `check()` is the backpressure signal: `false` means handlers bypass
/// their queue and write synchronously. A probe failure is fail-open.
pub struct MemoryMonitor {
    max_percent: f64,
    check_interval: Duration,
    state: Mutex<ProbeState>,
    probes: AtomicU64,
    warnings: AtomicU64,
    probe_errors: AtomicU64,
    start: Instant,
}

impl MemoryMonitor {
    pub fn new(max_percent: f64) -> Self {
        Self::with_check_interval(max_percent, DEFAULT_CHECK_INTERVAL)
    }

    pub fn with_check_interval(max_percent: f64, check_interval: Duration) -> Self {
        Self {
            max_percent,
            check_interval,
            state: Mutex::new(ProbeState {
                system: System::new(),
                last_check: None,
                last_result: true,
                warned: false,
                last_percent: 0.0,
                peak_percent: 0.0,
            }),
            probes: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            probe_errors: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Probe system memory, returning `true` while usage is under the
    /// threshold. Calls within the check interval return the cached
    /// result. Exactly one warning is emitted per threshold crossing.
    pub fn check(&self) -> bool {
        let mut state = self.state.lock();

        if let Some(last_check) = state.last_check {
            if last_check.elapsed() < self.check_interval {
                return state.last_result;
            }
        }

        state.last_check = Some(Instant::now());
        self.probes.fetch_add(1, Ordering::Relaxed);

        let percent = match Self::probe(&mut state.system) {
            Some(percent) => percent,
            None => {
                // Fail-open: an unreadable probe never blocks logging.
                self.probe_errors.fetch_add(1, Ordering::Relaxed);
                state.last_result = true;
                return true;
            }
        };

        state.last_percent = percent;
        if percent > state.peak_percent {
            state.peak_percent = percent;
        }

        if percent > self.max_percent {
            if !state.warned {
                state.warned = true;
                self.warnings.fetch_add(1, Ordering::Relaxed);
                eprintln!(
                    "[HYDRA WARNING] memory usage {:.1}% exceeds {:.1}%",
                    percent, self.max_percent
                );
            }
            state.last_result = false;
        } else {
            state.warned = false;
            state.last_result = true;
        }

        state.last_result
    }

    fn probe(system: &mut System) -> Option<f64> {
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        Some(system.used_memory() as f64 / total as f64 * 100.0)
    }

    pub fn is_healthy(&self) -> bool {
        self.check()
    }

    pub fn threshold(&self) -> f64 {
        self.max_percent
    }

    pub fn stats(&self) -> MemoryStats {
        let state = self.state.lock();
        MemoryStats {
            current_percent: state.last_percent,
            peak_percent: state.peak_percent,
            max_threshold: self.max_percent,
            check_interval_ms: self.check_interval.as_millis() as u64,
            probes: self.probes.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            probe_errors: self.probe_errors.load(Ordering::Relaxed),
            uptime_secs: self.start.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissive_threshold_is_healthy() {
        // No real system sits at 100% used memory.
        let monitor = MemoryMonitor::new(100.0);
        assert!(monitor.check());
        assert_eq!(monitor.stats().warnings, 0);
    }

    #[test]
    fn test_tight_threshold_is_unhealthy() {
        // Any running process uses more than a sliver of memory.
        let monitor = MemoryMonitor::new(0.000_1);
        assert!(!monitor.check());
        assert_eq!(monitor.stats().warnings, 1);
    }

    #[test]
    fn test_cached_result_within_interval() {
        let monitor = MemoryMonitor::with_check_interval(0.000_1, Duration::from_secs(60));
        assert!(!monitor.check());
        assert!(!monitor.check());
        assert!(!monitor.check());
        // Only the first call probed.
        assert_eq!(monitor.stats().probes, 1);
    }

    #[test]
    fn test_one_warning_per_crossing() {
        let monitor = MemoryMonitor::with_check_interval(0.000_1, Duration::from_millis(0));
        assert!(!monitor.check());
        assert!(!monitor.check());
        assert_eq!(monitor.stats().warnings, 1);
    }

    #[test]
    fn test_stats_shape() {
        let monitor = MemoryMonitor::new(70.0);
        monitor.check();
        let stats = monitor.stats();
        assert_eq!(stats.max_threshold, 70.0);
        assert!(stats.current_percent >= 0.0);
        assert!(stats.peak_percent >= stats.current_percent - f64::EPSILON);
    }
}
