//! Request metrics and statistics tracking for the classification service.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const LATENCY_WINDOW: usize = 10_000;

/// Metrics collector for the prediction endpoint
pub struct ServiceMetrics {
    /// Total prediction requests received
    requests: AtomicU64,
    /// Requests that produced a prediction
    predictions: AtomicU64,
    /// Failures by error kind
    errors_by_kind: RwLock<BTreeMap<String, u64>>,
    /// Predictions by label
    predictions_by_label: RwLock<BTreeMap<String, u64>>,
    /// End-to-end latencies (in microseconds)
    latencies: RwLock<Vec<u64>>,
    /// Confidence distribution buckets
    confidence_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            errors_by_kind: RwLock::new(BTreeMap::new()),
            predictions_by_label: RwLock::new(BTreeMap::new()),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            confidence_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a successful prediction
    pub fn record_prediction(&self, latency: Duration, label: &str, confidence: f64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.predictions.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);

        if let Ok(mut by_label) = self.predictions_by_label.write() {
            *by_label.entry(label.to_string()).or_insert(0) += 1;
        }

        let bucket = (confidence.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        if let Ok(mut buckets) = self.confidence_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    /// Record a failed request
    pub fn record_error(&self, latency: Duration, kind: &str) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);

        if let Ok(mut by_kind) = self.errors_by_kind.write() {
            *by_kind.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    fn record_latency(&self, latency: Duration) {
        if let Ok(mut times) = self.latencies.write() {
            times.push(latency.as_micros() as u64);
            if times.len() > LATENCY_WINDOW {
                times.drain(0..LATENCY_WINDOW / 2);
            }
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn predictions(&self) -> u64 {
        self.predictions.load(Ordering::Relaxed)
    }

    /// Latency statistics over the retained window
    pub fn latency_stats(&self) -> LatencyStats {
        let Ok(times) = self.latencies.read() else {
            return LatencyStats::default();
        };
        if times.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let percentile = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)];

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: percentile(0.50),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Requests per second since startup
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.requests() as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests(),
            predictions: self.predictions(),
            errors_by_kind: self
                .errors_by_kind
                .read()
                .map(|m| m.clone())
                .unwrap_or_default(),
            predictions_by_label: self
                .predictions_by_label
                .read()
                .map(|m| m.clone())
                .unwrap_or_default(),
            confidence_buckets: self
                .confidence_buckets
                .read()
                .map(|b| *b)
                .unwrap_or_default(),
            latency: self.latency_stats(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            throughput_rps: self.throughput(),
        }
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();
        let errors: u64 = snapshot.errors_by_kind.values().sum();
        let error_rate = if snapshot.requests > 0 {
            (errors as f64 / snapshot.requests as f64) * 100.0
        } else {
            0.0
        };

        info!(
            requests = snapshot.requests,
            predictions = snapshot.predictions,
            error_rate = format!("{:.1}%", error_rate),
            throughput = format!("{:.2} req/s", snapshot.throughput_rps),
            "Service metrics summary"
        );
        info!(
            mean_us = snapshot.latency.mean_us,
            p50_us = snapshot.latency.p50_us,
            p95_us = snapshot.latency.p95_us,
            p99_us = snapshot.latency.p99_us,
            max_us = snapshot.latency.max_us,
            "Request latency"
        );
        for (kind, count) in &snapshot.errors_by_kind {
            info!(kind = %kind, count, "Errors by kind");
        }
        for (label, count) in &snapshot.predictions_by_label {
            info!(label = %label, count, "Predictions by label");
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Serializable view served on `GET /metrics`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub predictions: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub predictions_by_label: BTreeMap<String, u64>,
    pub confidence_buckets: [u64; 10],
    pub latency: LatencyStats,
    pub uptime_secs: u64,
    pub throughput_rps: f64,
}

/// Periodically logs a metrics summary
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // first tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = ServiceMetrics::new();

        metrics.record_prediction(Duration::from_micros(100), "t-shirt", 0.91);
        metrics.record_prediction(Duration::from_micros(300), "t-shirt", 0.55);
        metrics.record_prediction(Duration::from_micros(200), "shoes", 1.0);
        metrics.record_error(Duration::from_micros(50), "decode_error");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 4);
        assert_eq!(snapshot.predictions, 3);
        assert_eq!(snapshot.predictions_by_label["t-shirt"], 2);
        assert_eq!(snapshot.errors_by_kind["decode_error"], 1);
        assert_eq!(snapshot.confidence_buckets[9], 2);
        assert_eq!(snapshot.confidence_buckets[5], 1);
    }

    #[test]
    fn test_latency_stats() {
        let metrics = ServiceMetrics::new();
        for us in 1..=100 {
            metrics.record_prediction(Duration::from_micros(us), "x", 0.5);
        }

        let stats = metrics.latency_stats();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.max_us, 100);
        assert_eq!(stats.p50_us, 51);
        assert_eq!(stats.p99_us, 100);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let metrics = ServiceMetrics::new();
        for _ in 0..(LATENCY_WINDOW + 1) {
            metrics.record_error(Duration::from_micros(1), "missing_input");
        }

        assert!(metrics.latency_stats().count <= LATENCY_WINDOW as u64);
        assert_eq!(metrics.requests(), LATENCY_WINDOW as u64 + 1);
    }
}
