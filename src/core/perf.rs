//! Dispatch timing samples for performance diagnostics

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Mean `log` dispatch latency above which performance reads unhealthy
const HEALTHY_MEAN_DISPATCH: Duration = Duration::from_millis(10);

/// Operation name used for the main dispatch path
pub const OP_LOG: &str = "log";

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OpStats {
    pub count: u64,
    pub total_us: u64,
    pub min_us: u64,
    pub max_us: u64,
}

impl OpStats {
    pub fn mean_us(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_us as f64 / self.count as f64
        }
    }

    fn record(&mut self, elapsed: Duration) {
        let micros = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        if self.count == 0 || micros < self.min_us {
            self.min_us = micros;
        }
        if micros > self.max_us {
            self.max_us = micros;
        }
        self.count += 1;
        self.total_us = self.total_us.saturating_add(micros);
    }
}

/// Collects per-operation timing samples around dispatch paths.
pub struct PerformanceMonitor {
    ops: Mutex<HashMap<&'static str, OpStats>>,
    start: Instant,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(HashMap::new()),
            start: Instant::now(),
        }
    }

    pub fn record(&self, op: &'static str, elapsed: Duration) {
        self.ops.lock().entry(op).or_default().record(elapsed);
    }

    pub fn op_stats(&self, op: &str) -> Option<OpStats> {
        self.ops.lock().get(op).copied()
    }

    pub fn is_performance_healthy(&self) -> bool {
        match self.op_stats(OP_LOG) {
            Some(stats) => stats.mean_us() < HEALTHY_MEAN_DISPATCH.as_micros() as f64,
            None => true,
        }
    }

    pub fn reset(&self) {
        self.ops.lock().clear();
    }

    pub fn metrics(&self) -> Value {
        let ops = self.ops.lock();
        let mut per_op = serde_json::Map::new();
        for (op, stats) in ops.iter() {
            per_op.insert(
                (*op).to_string(),
                json!({
                    "count": stats.count,
                    "total_us": stats.total_us,
                    "min_us": stats.min_us,
                    "max_us": stats.max_us,
                    "mean_us": stats.mean_us(),
                }),
            );
        }
        json!({
            "uptime": self.start.elapsed().as_secs_f64(),
            "is_performance_healthy": self.is_performance_healthy(),
            "operations": Value::Object(per_op),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_aggregate() {
        let perf = PerformanceMonitor::new();
        perf.record(OP_LOG, Duration::from_micros(100));
        perf.record(OP_LOG, Duration::from_micros(300));

        let stats = perf.op_stats(OP_LOG).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min_us, 100);
        assert_eq!(stats.max_us, 300);
        assert_eq!(stats.mean_us(), 200.0);
    }

    #[test]
    fn test_healthy_with_fast_dispatch() {
        let perf = PerformanceMonitor::new();
        assert!(perf.is_performance_healthy());
        perf.record(OP_LOG, Duration::from_micros(50));
        assert!(perf.is_performance_healthy());
    }

    #[test]
    fn test_unhealthy_with_slow_dispatch() {
        let perf = PerformanceMonitor::new();
        perf.record(OP_LOG, Duration::from_millis(500));
        assert!(!perf.is_performance_healthy());
    }

    #[test]
    fn test_metrics_shape() {
        let perf = PerformanceMonitor::new();
        perf.record(OP_LOG, Duration::from_micros(10));
        let metrics = perf.metrics();
        assert_eq!(metrics["operations"][OP_LOG]["count"], 1);
        assert!(metrics["is_performance_healthy"].as_bool().unwrap());
    }

    #[test]
    fn test_reset() {
        let perf = PerformanceMonitor::new();
        perf.record(OP_LOG, Duration::from_millis(500));
        perf.reset();
        assert!(perf.op_stats(OP_LOG).is_none());
        assert!(perf.is_performance_healthy());
    }
}
