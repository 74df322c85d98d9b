//! Cache hit/miss counters and latency sampling.
//!
//! Counters are lock-free atomics safe under concurrent increment; latency
//! samples are a bounded rolling window (oldest evicted past the cap).
//! Every increment also feeds the process-wide `metrics` recorder so the
//! same numbers land in the exporter; descriptions live in
//! `infra::telemetry`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::metrics";
const MAX_LATENCY_SAMPLES: usize = 1000;

pub(crate) const METRIC_HIT_TOTAL: &str = "scorta_cache_hit_total";
pub(crate) const METRIC_MISS_TOTAL: &str = "scorta_cache_miss_total";
pub(crate) const METRIC_FALLBACK_HIT_TOTAL: &str = "scorta_cache_fallback_hit_total";
pub(crate) const METRIC_INVALIDATION_TOTAL: &str = "scorta_cache_invalidation_total";
pub(crate) const METRIC_OP_MS: &str = "scorta_cache_op_ms";

/// Monotonic hit/miss counters plus a rolling latency sample.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    latencies: Mutex<VecDeque<Duration>>,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_HIT_TOTAL).increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_MISS_TOTAL).increment(1);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate as a percentage; zero when nothing was recorded yet.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 { 0.0 } else { hits / total * 100.0 }
    }

    /// Average recorded operation latency in milliseconds.
    pub fn average_latency_ms(&self) -> f64 {
        let samples = mutex_lock(&self.latencies, SOURCE, "average_latency_ms");
        if samples.is_empty() {
            return 0.0;
        }
        let total: Duration = samples.iter().sum();
        total.as_secs_f64() * 1000.0 / samples.len() as f64
    }

    /// Start a scoped latency measurement.
    ///
    /// Elapsed time is recorded when the guard drops, whether the measured
    /// operation succeeded or not.
    pub fn measure_latency(&self) -> LatencyMeasurement<'_> {
        LatencyMeasurement {
            metrics: self,
            started: Instant::now(),
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        mutex_lock(&self.latencies, SOURCE, "reset").clear();
    }

    fn record_latency(&self, elapsed: Duration) {
        histogram!(METRIC_OP_MS).record(elapsed.as_secs_f64() * 1000.0);

        let mut samples = mutex_lock(&self.latencies, SOURCE, "record_latency");
        samples.push_back(elapsed);
        while samples.len() > MAX_LATENCY_SAMPLES {
            samples.pop_front();
        }
    }
}

/// Scope guard returned by [`CacheMetrics::measure_latency`].
pub struct LatencyMeasurement<'a> {
    metrics: &'a CacheMetrics,
    started: Instant,
}

impl Drop for LatencyMeasurement<'_> {
    fn drop(&mut self) {
        self.metrics.record_latency(self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn hit_rate_over_recorded_counts() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.hit_rate(), 0.0);

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();

        assert_eq!(metrics.hits(), 3);
        assert_eq!(metrics.misses(), 1);
        assert_eq!(metrics.hit_rate(), 75.0);
    }

    #[test]
    fn latency_guard_records_on_drop() {
        let metrics = CacheMetrics::new();
        {
            let _guard = metrics.measure_latency();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(metrics.average_latency_ms() > 0.0);
    }

    #[test]
    fn latency_samples_are_bounded() {
        let metrics = CacheMetrics::new();
        for _ in 0..(MAX_LATENCY_SAMPLES + 100) {
            metrics.record_latency(Duration::from_millis(1));
        }
        let samples = metrics.latencies.lock().unwrap();
        assert_eq!(samples.len(), MAX_LATENCY_SAMPLES);
    }

    #[test]
    fn reset_clears_counters_and_samples() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_latency(Duration::from_millis(5));

        metrics.reset();

        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.misses(), 0);
        assert_eq!(metrics.average_latency_ms(), 0.0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let metrics = Arc::new(CacheMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.record_hit();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.hits(), 8000);
    }
}
