//! Operation timing
//!
//! [`MetricsRecorder`] wraps operations, records how long they took and whether they
//! failed, and hands the original result back untouched. Each operation keeps a
//! bounded window of recent durations from which percentiles are computed.

use crate::config::MetricsConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct OperationSamples {
    durations: VecDeque<Duration>,
    count: u64,
    failures: u64,
    last_metadata: BTreeMap<String, String>,
}

/// Summary for one operation; durations in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricStats {
    pub operation: String,
    pub count: u64,
    pub failures: u64,
    pub samples: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub last_metadata: BTreeMap<String, String>,
}

impl MetricStats {
    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            1.0
        } else {
            (self.count - self.failures) as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsExport {
    generated_at: DateTime<Utc>,
    slow_threshold_ms: u64,
    operations: Vec<MetricStats>,
}

/// Nearest-rank percentile over ascending samples
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

#[derive(Debug)]
pub struct MetricsRecorder {
    enabled: AtomicBool,
    max_samples: usize,
    slow_threshold: Duration,
    operations: DashMap<String, OperationSamples>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::from_config(&MetricsConfig::default())
    }
}

impl MetricsRecorder {
    pub fn new(max_samples: usize, slow_threshold: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            max_samples: max_samples.max(1),
            slow_threshold,
            operations: DashMap::new(),
        }
    }

    pub fn from_config(config: &MetricsConfig) -> Self {
        let recorder = Self::new(config.max_samples, Duration::from_millis(config.slow_threshold_ms));
        recorder.set_enabled(config.enabled);
        recorder
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Time a fallible async operation
    pub async fn record<T, E, Fut>(&self, operation: &str, metadata: &[(&str, &str)], fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.is_enabled() {
            return fut.await;
        }
        let start = Instant::now();
        let result = fut.await;
        self.observe(operation, metadata, start.elapsed(), result.is_ok());
        result
    }

    /// Time an async operation that cannot fail
    pub async fn measure<T, Fut>(&self, operation: &str, fut: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        if !self.is_enabled() {
            return fut.await;
        }
        let start = Instant::now();
        let value = fut.await;
        self.observe(operation, &[], start.elapsed(), true);
        value
    }

    /// Time a fallible closure
    pub fn record_sync<T, E, F>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !self.is_enabled() {
            return f();
        }
        let start = Instant::now();
        let result = f();
        self.observe(operation, &[], start.elapsed(), result.is_ok());
        result
    }

    fn observe(&self, operation: &str, metadata: &[(&str, &str)], elapsed: Duration, success: bool) {
        let mut samples = self.operations.entry(operation.to_string()).or_default();
        samples.count += 1;
        if !success {
            samples.failures += 1;
        }
        if samples.durations.len() >= self.max_samples {
            samples.durations.pop_front();
        }
        samples.durations.push_back(elapsed);
        if !metadata.is_empty() {
            samples.last_metadata = metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        }
        drop(samples);

        debug!(
            operation,
            duration_ms = millis(elapsed),
            success,
            "Operation recorded"
        );
        if elapsed > self.slow_threshold {
            warn!(operation, duration_ms = millis(elapsed), "Slow operation");
        }
    }

    pub fn get_stats(&self, operation: &str) -> Option<MetricStats> {
        let samples = self.operations.get(operation)?;
        Some(Self::summarize(operation, &samples))
    }

    fn summarize(operation: &str, samples: &OperationSamples) -> MetricStats {
        let mut sorted: Vec<Duration> = samples.durations.iter().copied().collect();
        sorted.sort();

        let total: Duration = sorted.iter().sum();
        let avg = if sorted.is_empty() {
            Duration::ZERO
        } else {
            total / sorted.len() as u32
        };

        MetricStats {
            operation: operation.to_string(),
            count: samples.count,
            failures: samples.failures,
            samples: sorted.len(),
            min_ms: sorted.first().copied().map(millis).unwrap_or(0.0),
            max_ms: sorted.last().copied().map(millis).unwrap_or(0.0),
            avg_ms: millis(avg),
            p50_ms: millis(percentile(&sorted, 50.0)),
            p95_ms: millis(percentile(&sorted, 95.0)),
            p99_ms: millis(percentile(&sorted, 99.0)),
            last_metadata: samples.last_metadata.clone(),
        }
    }

    /// Stats for every operation, by name
    pub fn all_stats(&self) -> Vec<MetricStats> {
        let mut stats: Vec<MetricStats> = self
            .operations
            .iter()
            .map(|entry| Self::summarize(entry.key(), entry.value()))
            .collect();
        stats.sort_by(|a, b| a.operation.cmp(&b.operation));
        stats
    }

    /// JSON document of all stats, `None` when nothing has been recorded
    pub fn export_metrics(&self) -> Option<Vec<u8>> {
        if self.operations.is_empty() {
            return None;
        }
        let export = MetricsExport {
            generated_at: Utc::now(),
            slow_threshold_ms: self.slow_threshold.as_millis() as u64,
            operations: self.all_stats(),
        };
        serde_json::to_vec_pretty(&export).ok()
    }

    /// Plain-text table of all operations, slow ones listed at the end
    pub fn generate_report(&self) -> String {
        let stats = self.all_stats();
        let mut report = String::new();

        if stats.is_empty() {
            report.push_str("No operations recorded\n");
            return report;
        }

        let _ = writeln!(
            report,
            "{:<28} {:>7} {:>6} {:>10} {:>10} {:>10} {:>10}",
            "Operation", "Count", "Fail", "Avg(ms)", "P50(ms)", "P95(ms)", "P99(ms)"
        );
        for s in &stats {
            let _ = writeln!(
                report,
                "{:<28} {:>7} {:>6} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
                s.operation, s.count, s.failures, s.avg_ms, s.p50_ms, s.p95_ms, s.p99_ms
            );
        }

        let threshold_ms = millis(self.slow_threshold);
        let slow: Vec<&MetricStats> = stats.iter().filter(|s| s.avg_ms > threshold_ms).collect();
        if !slow.is_empty() {
            let _ = writeln!(report, "\nSlow operations (avg > {threshold_ms:.0}ms):");
            for s in slow {
                let _ = writeln!(report, "  {} {:.2}ms", s.operation, s.avg_ms);
            }
        }

        report
    }

    pub fn clear(&self) {
        self.operations.clear();
    }
}
