//! Performance metrics and statistics tracking for the click-fraud pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Single-event predictions served
    pub predictions_made: AtomicU64,
    /// Single-event predictions on the fraud side of the threshold
    pub predictions_flagged: AtomicU64,
    /// Batches scored end to end
    pub batches_scored: AtomicU64,
    /// Rows scored across all batches
    pub rows_scored: AtomicU64,
    /// Upload rows dropped before scoring
    pub rows_dropped: AtomicU64,
    /// Clicks appended to the event log
    pub clicks_ingested: AtomicU64,
    /// Clicks flagged by the velocity detector
    pub clicks_flagged: AtomicU64,
    /// Single-prediction latency (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Model inference times (in microseconds)
    model_times: RwLock<HashMap<String, Vec<u64>>>,
    /// Per-model batch failures
    model_failures: RwLock<HashMap<String, u64>>,
    /// Fraud probability distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            predictions_made: AtomicU64::new(0),
            predictions_flagged: AtomicU64::new(0),
            batches_scored: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            rows_dropped: AtomicU64::new(0),
            clicks_ingested: AtomicU64::new(0),
            clicks_flagged: AtomicU64::new(0),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            model_times: RwLock::new(HashMap::new()),
            model_failures: RwLock::new(HashMap::new()),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a single-event prediction
    pub fn record_prediction(&self, processing_time: Duration, fraud_probability: f64, is_fraud: bool) {
        self.predictions_made.fetch_add(1, Ordering::Relaxed);
        if is_fraud {
            self.predictions_flagged.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        self.record_scores(&[fraud_probability]);
    }

    /// Add probabilities to the score distribution
    pub fn record_scores(&self, probabilities: &[f64]) {
        if let Ok(mut buckets) = self.score_buckets.write() {
            for &p in probabilities {
                let bucket = (p.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
                buckets[bucket] += 1;
            }
        }
    }

    /// Record a completed batch
    pub fn record_batch(&self, rows: usize, dropped: usize) {
        self.batches_scored.fetch_add(1, Ordering::Relaxed);
        self.rows_scored.fetch_add(rows as u64, Ordering::Relaxed);
        self.rows_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    /// Record model inference time
    pub fn record_model_time(&self, model_name: &str, duration: Duration) {
        if let Ok(mut times) = self.model_times.write() {
            let model_times = times.entry(model_name.to_string()).or_default();
            model_times.push(duration.as_micros() as u64);
            // Keep only last 1000 per model
            if model_times.len() > 1000 {
                model_times.drain(0..500);
            }
        }
    }

    pub fn record_model_failure(&self, model_name: &str) {
        if let Ok(mut failures) = self.model_failures.write() {
            *failures.entry(model_name.to_string()).or_insert(0) += 1;
        }
    }

    /// Record one ingested click
    pub fn record_click(&self, flagged: bool) {
        self.clicks_ingested.fetch_add(1, Ordering::Relaxed);
        if flagged {
            self.clicks_flagged.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let Ok(times) = self.processing_times.read() else {
            return ProcessingStats::default();
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[percentile_index(count, 0.95)],
            p99_us: sorted[percentile_index(count, 0.99)],
            max_us: sorted.last().copied().unwrap_or(0),
        }
    }

    /// Get model performance stats
    pub fn get_model_stats(&self) -> HashMap<String, ModelStats> {
        let mut stats = HashMap::new();
        let failures = self.get_model_failures();
        let Ok(times) = self.model_times.read() else {
            return stats;
        };

        for (model, model_times) in times.iter() {
            if model_times.is_empty() {
                continue;
            }

            let mut sorted: Vec<u64> = model_times.clone();
            sorted.sort_unstable();

            let sum: u64 = sorted.iter().sum();
            let count = sorted.len();

            stats.insert(
                model.clone(),
                ModelStats {
                    calls: count as u64,
                    failures: failures.get(model).copied().unwrap_or(0),
                    mean_us: sum / count as u64,
                    p50_us: sorted[count / 2],
                    p99_us: sorted[percentile_index(count, 0.99)],
                },
            );
        }

        stats
    }

    pub fn get_model_failures(&self) -> HashMap<String, u64> {
        self.model_failures
            .read()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    /// Rows and predictions scored per second
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let scored = self.predictions_made.load(Ordering::Relaxed) + self.rows_scored.load(Ordering::Relaxed);
        if elapsed > 0.0 {
            scored as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get score distribution
    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let predictions = self.predictions_made.load(Ordering::Relaxed);
        let flagged = self.predictions_flagged.load(Ordering::Relaxed);
        let batches = self.batches_scored.load(Ordering::Relaxed);
        let rows = self.rows_scored.load(Ordering::Relaxed);
        let dropped = self.rows_dropped.load(Ordering::Relaxed);
        let clicks = self.clicks_ingested.load(Ordering::Relaxed);
        let click_flags = self.clicks_flagged.load(Ordering::Relaxed);

        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║             CLICK FRAUD PIPELINE - METRICS SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predictions: {:>8} (flagged {:>6})  │  {:>8.1} rows/s    ║",
            predictions, flagged, throughput
        );
        info!(
            "║ Batches: {:>6}  Rows scored: {:>8}  Rows dropped: {:>6}  ║",
            batches, rows, dropped
        );
        info!(
            "║ Clicks ingested: {:>8}  │  Velocity flags: {:>8}        ║",
            clicks, click_flags
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predict Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5}  ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Fraud Probability Distribution:                              ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar_len = (pct / 2.0) as usize;
            let bar: String = "█".repeat(bar_len.min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        let model_stats = self.get_model_stats();
        if !model_stats.is_empty() {
            info!("Model Inference Times (μs):");
            for (model, stats) in &model_stats {
                info!(
                    "  {}: mean={} p50={} p99={} (calls={}, failures={})",
                    model, stats.mean_us, stats.p50_us, stats.p99_us, stats.calls, stats.failures
                );
            }
        }
        for (model, count) in self.get_model_failures() {
            if !model_stats.contains_key(&model) {
                info!("  {}: never ran (failures={})", model, count);
            }
        }
    }
}

fn percentile_index(count: usize, q: f64) -> usize {
    ((count as f64 * q) as usize).min(count - 1)
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Model-specific statistics
#[derive(Debug)]
pub struct ModelStats {
    pub calls: u64,
    pub failures: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
}

/// Prints periodic summaries while a long-running command is active
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // the first tick completes immediately
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
        let metrics = PipelineMetrics::new();

        metrics.record_prediction(Duration::from_micros(100), 0.2, false);
        metrics.record_prediction(Duration::from_micros(200), 0.8, true);
        metrics.record_click(true);
        metrics.record_click(false);
        metrics.record_batch(10, 2);

        assert_eq!(metrics.predictions_made.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.predictions_flagged.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.clicks_ingested.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.clicks_flagged.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.rows_dropped.load(Ordering::Relaxed), 2);

        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.max_us, 200);
    }

    #[test]
    fn test_score_distribution_edges() {
        let metrics = PipelineMetrics::new();
        metrics.record_scores(&[0.0, 0.05, 0.5, 1.0]);

        let dist = metrics.get_score_distribution();
        assert_eq!(dist[0], 2);
        assert_eq!(dist[5], 1);
        assert_eq!(dist[9], 1);
    }

    #[test]
    fn test_model_stats_include_failures() {
        let metrics = PipelineMetrics::new();
        metrics.record_model_time("xgboost", Duration::from_micros(50));
        metrics.record_model_failure("xgboost");
        metrics.record_model_failure("neural_network");

        let stats = metrics.get_model_stats();
        assert_eq!(stats["xgboost"].calls, 1);
        assert_eq!(stats["xgboost"].failures, 1);
        assert!(!stats.contains_key("neural_network"));
        assert_eq!(metrics.get_model_failures()["neural_network"], 1);
    }
}
