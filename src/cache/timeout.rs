//! Entry lifetime computation.
//!
//! Three interchangeable policies, selected at configuration time: a
//! static provider, a path-keyed table, and an adaptive provider that
//! widens or shrinks the timeout from the observed hit/miss ratio.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Observations per adjustment window in the adaptive provider.
const SAMPLE_WINDOW: u32 = 10;
/// Seed timeout when a miss is recorded for a key never seen before.
const SEED_TIMEOUT: Duration = Duration::from_secs(60);
/// Stats idle longer than this are recycled on next touch.
const STATS_IDLE_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

pub const DEFAULT_MIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(3600);
pub const DEFAULT_HIT_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_MISS_MULTIPLIER: f64 = 0.5;

/// Computes the time-to-live for a new or refreshed entry.
pub trait TimeoutProvider: Send + Sync {
    /// The timeout to apply for `key`. Counts as one hit observation for
    /// providers that track usage.
    fn timeout_for(&self, key: &str, default_ttl: Duration) -> Duration;

    /// Record a cache miss for `key` without returning a timeout.
    fn record_miss(&self, _key: &str) {}
}

/// Always returns the configured default.
#[derive(Debug, Default)]
pub struct StaticTimeoutProvider;

impl TimeoutProvider for StaticTimeoutProvider {
    fn timeout_for(&self, _key: &str, default_ttl: Duration) -> Duration {
        default_ttl
    }
}

/// Looks the path portion of the key up in a prefix table.
///
/// The path is everything before the first `|` separator. An exact match
/// wins; otherwise the longest matching prefix; otherwise the call default
/// (when positive) or the provider default.
pub struct PathTimeoutProvider {
    path_timeouts: HashMap<String, Duration>,
    default_timeout: Duration,
}

impl PathTimeoutProvider {
    pub fn new(path_timeouts: HashMap<String, Duration>, default_timeout: Duration) -> Self {
        Self {
            path_timeouts,
            default_timeout,
        }
    }
}

impl TimeoutProvider for PathTimeoutProvider {
    fn timeout_for(&self, key: &str, default_ttl: Duration) -> Duration {
        let path = key.split('|').next().unwrap_or(key);

        if let Some(timeout) = self.path_timeouts.get(path) {
            return *timeout;
        }

        let prefix_match = self
            .path_timeouts
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());
        if let Some((_, timeout)) = prefix_match {
            return *timeout;
        }

        if default_ttl > Duration::ZERO {
            default_ttl
        } else {
            self.default_timeout
        }
    }
}

#[derive(Debug)]
struct UsageStats {
    hits: u32,
    misses: u32,
    current_timeout: Duration,
    last_updated: Instant,
}

impl UsageStats {
    fn seeded(timeout: Duration) -> Self {
        Self {
            hits: 0,
            misses: 0,
            current_timeout: timeout,
            last_updated: Instant::now(),
        }
    }

    fn is_stale(&self) -> bool {
        self.last_updated.elapsed() >= STATS_IDLE_EXPIRY
    }
}

/// Adjusts per-key timeouts from a rolling 10-observation window.
///
/// A hit ratio above 0.8 multiplies the timeout by the hit multiplier
/// (capped); below 0.2 by the miss multiplier (floored); anything in
/// between leaves it unchanged. The window restarts after every check.
pub struct AdaptiveTimeoutProvider {
    stats: DashMap<String, UsageStats>,
    min_timeout: Duration,
    max_timeout: Duration,
    hit_multiplier: f64,
    miss_multiplier: f64,
}

impl AdaptiveTimeoutProvider {
    pub fn new(
        min_timeout: Duration,
        max_timeout: Duration,
        hit_multiplier: f64,
        miss_multiplier: f64,
    ) -> Self {
        Self {
            stats: DashMap::new(),
            min_timeout,
            max_timeout,
            hit_multiplier,
            miss_multiplier,
        }
    }

    fn adjust(&self, key: &str, stats: &mut UsageStats) {
        let total = stats.hits + stats.misses;
        if total < SAMPLE_WINDOW {
            return;
        }

        let hit_ratio = f64::from(stats.hits) / f64::from(total);
        if hit_ratio > 0.8 {
            stats.current_timeout = stats
                .current_timeout
                .mul_f64(self.hit_multiplier)
                .min(self.max_timeout);
            debug!(key, timeout_secs = stats.current_timeout.as_secs(), hit_ratio, "widened adaptive timeout");
        } else if hit_ratio < 0.2 {
            stats.current_timeout = stats
                .current_timeout
                .mul_f64(self.miss_multiplier)
                .max(self.min_timeout);
            debug!(key, timeout_secs = stats.current_timeout.as_secs(), hit_ratio, "shrank adaptive timeout");
        }

        stats.hits = 0;
        stats.misses = 0;
    }
}

impl Default for AdaptiveTimeoutProvider {
    fn default() -> Self {
        Self::new(
            DEFAULT_MIN_TIMEOUT,
            DEFAULT_MAX_TIMEOUT,
            DEFAULT_HIT_MULTIPLIER,
            DEFAULT_MISS_MULTIPLIER,
        )
    }
}

impl TimeoutProvider for AdaptiveTimeoutProvider {
    fn timeout_for(&self, key: &str, default_ttl: Duration) -> Duration {
        // The entry API keeps creation atomic: two concurrent calls for a
        // new key never materialize two stat objects.
        let mut stats = self
            .stats
            .entry(key.to_string())
            .or_insert_with(|| UsageStats::seeded(default_ttl));
        if stats.is_stale() {
            *stats = UsageStats::seeded(default_ttl);
        }

        stats.hits += 1;
        stats.last_updated = Instant::now();
        self.adjust(key, &mut stats);

        stats.current_timeout
    }

    fn record_miss(&self, key: &str) {
        let mut stats = self
            .stats
            .entry(key.to_string())
            .or_insert_with(|| UsageStats::seeded(SEED_TIMEOUT));
        if stats.is_stale() {
            *stats = UsageStats::seeded(SEED_TIMEOUT);
        }

        stats.misses += 1;
        stats.last_updated = Instant::now();
    }
}
