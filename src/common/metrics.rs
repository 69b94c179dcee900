//! Reconfiguration metrics
//!
//! Prometheus-compatible counters, gauges and histograms for:
//! - Reconfiguration jobs (submitted, installed, failed by class)
//! - OSD RPCs issued per fan-out phase and their failures
//! - Quorum failures
//! - Job duration

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Histogram bucket boundaries for job durations (in milliseconds).
/// The upper buckets cover jobs that sat through a full lease wait.
const JOB_DURATION_BUCKETS: [f64; 12] = [
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 15000.0, 30000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as thousandths for precision
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    pub jobs_submitted: Counter,
    pub jobs_installed: Counter,
    pub jobs_failed: Counter,
    pub jobs_permission_denied: Counter,
    pub jobs_redirected: Counter,
    pub quorum_failures: Counter,

    pub invalidate_rpcs: Counter,
    pub update_rpcs: Counter,
    pub rpc_errors: Counter,
    pub primary_wait_timeouts: Counter,

    pub crashed_locks_recovered: Counter,

    /// Jobs waiting in the runner queue
    pub queue_depth: Gauge,

    pub job_duration: Histogram,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            jobs_submitted: Counter::new(),
            jobs_installed: Counter::new(),
            jobs_failed: Counter::new(),
            jobs_permission_denied: Counter::new(),
            jobs_redirected: Counter::new(),
            quorum_failures: Counter::new(),
            invalidate_rpcs: Counter::new(),
            update_rpcs: Counter::new(),
            rpc_errors: Counter::new(),
            primary_wait_timeouts: Counter::new(),
            crashed_locks_recovered: Counter::new(),
            queue_depth: Gauge::new(),
            job_duration: Histogram::with_buckets(&JOB_DURATION_BUCKETS),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters: [(&str, &str, &Counter); 11] = [
            ("jobs_submitted_total", "Reconfiguration jobs submitted", &self.jobs_submitted),
            ("jobs_installed_total", "Replica sets installed", &self.jobs_installed),
            ("jobs_failed_total", "Reconfiguration jobs that failed", &self.jobs_failed),
            (
                "jobs_permission_denied_total",
                "Jobs failed with a permission error",
                &self.jobs_permission_denied,
            ),
            ("jobs_redirected_total", "Jobs redirected to the metadata master", &self.jobs_redirected),
            ("quorum_failures_total", "Fan-outs that could not reach quorum", &self.quorum_failures),
            ("invalidate_rpcs_total", "Invalidate RPCs sent to OSDs", &self.invalidate_rpcs),
            ("update_rpcs_total", "Authoritative state pushes sent to OSDs", &self.update_rpcs),
            ("rpc_errors_total", "OSD RPCs that failed or timed out", &self.rpc_errors),
            (
                "primary_wait_timeouts_total",
                "Invalidations that gave up waiting for the primary",
                &self.primary_wait_timeouts,
            ),
            (
                "crashed_locks_recovered_total",
                "Reconfiguration locks taken over from a dead process",
                &self.crashed_locks_recovered,
            ),
        ];

        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP minimrc_{} {}", name, help);
            let _ = writeln!(out, "# TYPE minimrc_{} counter", name);
            let _ = writeln!(out, "minimrc_{} {}", name, counter.get());
        }

        out.push_str("# HELP minimrc_queue_depth Jobs waiting for the coordinator\n");
        out.push_str("# TYPE minimrc_queue_depth gauge\n");
        let _ = writeln!(out, "minimrc_queue_depth {}", self.queue_depth.get());

        out.push_str("# HELP minimrc_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE minimrc_uptime_seconds gauge\n");
        let _ = writeln!(out, "minimrc_uptime_seconds {}", self.uptime_seconds());

        out.push_str("# HELP minimrc_job_duration_ms Reconfiguration job duration in milliseconds\n");
        out.push_str("# TYPE minimrc_job_duration_ms histogram\n");
        for (le, count) in self.job_duration.get_buckets() {
            if le.is_infinite() {
                let _ = writeln!(out, "minimrc_job_duration_ms_bucket{{le=\"+Inf\"}} {}", count);
            } else {
                let _ = writeln!(out, "minimrc_job_duration_ms_bucket{{le=\"{}\"}} {}", le, count);
            }
        }
        let _ = writeln!(out, "minimrc_job_duration_ms_sum {}", self.job_duration.sum());
        let _ = writeln!(out, "minimrc_job_duration_ms_count {}", self.job_duration.count());

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::with_buckets(&JOB_DURATION_BUCKETS);

        hist.observe(7.0);
        hist.observe(400.0);
        hist.observe(20000.0);
        hist.observe(90000.0);

        assert_eq!(hist.count(), 4);
        let buckets = hist.get_buckets();
        assert_eq!(buckets.first(), Some(&(5.0, 0)));
        assert_eq!(buckets[1], (10.0, 1));
        assert_eq!(buckets.last().map(|b| b.1), Some(4));
        assert!((hist.sum() - 110407.0).abs() < 0.01);
    }

    #[test]
    fn test_gauge_never_underflows() {
        let gauge = Gauge::new();
        gauge.dec();
        assert_eq!(gauge.get(), 0);
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 1);
    }

    #[test]
    fn test_prometheus_output() {
        let registry = MetricsRegistry::new();
        registry.jobs_submitted.add(3);
        registry.quorum_failures.inc();
        registry.job_duration.observe(12.0);

        let out = registry.to_prometheus();
        assert!(out.contains("minimrc_jobs_submitted_total 3"));
        assert!(out.contains("minimrc_quorum_failures_total 1"));
        assert!(out.contains("minimrc_job_duration_ms_bucket{le=\"+Inf\"} 1"));
        assert!(out.contains("# TYPE minimrc_queue_depth gauge"));
    }
}
