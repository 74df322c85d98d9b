//! Caching configuration.
//!
//! Everything here is read once when the engine is built; nothing is
//! hot-reloaded mid-call. Invalid selections fail fast at build time with
//! [`CacheError::InvalidConfiguration`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::error::CacheError;
use super::timeout::{
    AdaptiveTimeoutProvider, DEFAULT_HIT_MULTIPLIER, DEFAULT_MISS_MULTIPLIER, PathTimeoutProvider,
    StaticTimeoutProvider, TimeoutProvider,
};

// Default values for caching configuration
const DEFAULT_TTL_SECS: u64 = 60;
const DEFAULT_SIZE_LIMIT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_COMPRESSION_THRESHOLD_BYTES: usize = 1024;
const DEFAULT_FALLBACK_CAPACITY: usize = 512;
const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_BREAKER_BREAK_SECS: u64 = 60;
const DEFAULT_ADAPTIVE_MIN_SECS: u64 = 10;
const DEFAULT_ADAPTIVE_MAX_SECS: u64 = 3600;

/// Timeout-provider selection, decided at configuration time.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TimeoutPolicy {
    /// Every entry gets the default TTL.
    #[default]
    Static,
    /// TTL looked up by the path portion of the key.
    PathBased {
        #[serde(default)]
        path_timeouts_secs: HashMap<String, u64>,
    },
    /// TTL adapted from the observed hit/miss ratio per key.
    Adaptive {
        #[serde(default = "default_adaptive_min")]
        min_secs: u64,
        #[serde(default = "default_adaptive_max")]
        max_secs: u64,
        #[serde(default = "default_hit_multiplier")]
        hit_multiplier: f64,
        #[serde(default = "default_miss_multiplier")]
        miss_multiplier: f64,
    },
}

fn default_adaptive_min() -> u64 {
    DEFAULT_ADAPTIVE_MIN_SECS
}

fn default_adaptive_max() -> u64 {
    DEFAULT_ADAPTIVE_MAX_SECS
}

fn default_hit_multiplier() -> f64 {
    DEFAULT_HIT_MULTIPLIER
}

fn default_miss_multiplier() -> f64 {
    DEFAULT_MISS_MULTIPLIER
}

impl TimeoutPolicy {
    /// Build the provider this policy selects.
    pub fn provider(&self) -> Result<Arc<dyn TimeoutProvider>, CacheError> {
        match self {
            Self::Static => Ok(Arc::new(StaticTimeoutProvider)),
            Self::PathBased { path_timeouts_secs } => {
                let table = path_timeouts_secs
                    .iter()
                    .map(|(path, secs)| (path.clone(), Duration::from_secs(*secs)))
                    .collect();
                Ok(Arc::new(PathTimeoutProvider::new(
                    table,
                    Duration::from_secs(DEFAULT_TTL_SECS),
                )))
            }
            Self::Adaptive {
                min_secs,
                max_secs,
                hit_multiplier,
                miss_multiplier,
            } => {
                if min_secs > max_secs {
                    return Err(CacheError::configuration(format!(
                        "adaptive timeout minimum ({min_secs}s) exceeds maximum ({max_secs}s)"
                    )));
                }
                if *hit_multiplier <= 0.0 || *miss_multiplier <= 0.0 {
                    return Err(CacheError::configuration(
                        "adaptive timeout multipliers must be positive",
                    ));
                }
                Ok(Arc::new(AdaptiveTimeoutProvider::new(
                    Duration::from_secs(*min_secs),
                    Duration::from_secs(*max_secs),
                    *hit_multiplier,
                    *miss_multiplier,
                )))
            }
        }
    }
}

/// Startup configuration for the caching layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CachingOptions {
    /// Master switch; disabled means every call bypasses the cache.
    pub enabled: bool,
    /// Default time-to-live in seconds for stored entries.
    pub default_ttl_secs: u64,
    /// Payloads larger than this are never stored.
    pub size_limit_bytes: u64,
    /// Minimum payload size before compression applies.
    pub compression_threshold_bytes: usize,
    /// Allow detached background refresh for stale-while-revalidate.
    pub enable_background_refresh: bool,
    /// Capacity of the in-process fallback store.
    pub fallback_capacity: usize,
    /// Store failures tolerated before the circuit opens.
    pub breaker_failure_threshold: u32,
    /// Seconds the circuit stays open once tripped.
    pub breaker_break_secs: u64,
    /// Timeout-provider selection.
    pub timeout_policy: TimeoutPolicy,
}

impl Default for CachingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: DEFAULT_TTL_SECS,
            size_limit_bytes: DEFAULT_SIZE_LIMIT_BYTES,
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD_BYTES,
            enable_background_refresh: true,
            fallback_capacity: DEFAULT_FALLBACK_CAPACITY,
            breaker_failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            breaker_break_secs: DEFAULT_BREAKER_BREAK_SECS,
            timeout_policy: TimeoutPolicy::Static,
        }
    }
}

impl CachingOptions {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn break_duration(&self) -> Duration {
        Duration::from_secs(self.breaker_break_secs)
    }

    /// Reject configurations that cannot work. Called once at build time.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.default_ttl_secs == 0 {
            return Err(CacheError::configuration("default TTL must be positive"));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(CacheError::configuration(
                "breaker failure threshold must be positive",
            ));
        }
        // Surfaces adaptive misconfiguration at startup instead of first use.
        self.timeout_policy.provider().map(|_| ())
    }
}
