//! Tracing subscriber installation and metric descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use serde::Deserialize;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::CacheError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Compact,
}

/// Logging settings, read once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default tracing directive, overridable via `RUST_LOG`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), CacheError> {
    describe_metrics();

    let default_directive = logging.level.parse().map_err(|err| {
        CacheError::configuration(format!("invalid log level {:?}: {err}", logging.level))
    })?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            CacheError::configuration(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "scorta_cache_hit_total",
            Unit::Count,
            "Total number of cache hits."
        );
        describe_counter!(
            "scorta_cache_miss_total",
            Unit::Count,
            "Total number of cache misses."
        );
        describe_counter!(
            "scorta_cache_fallback_hit_total",
            Unit::Count,
            "Total number of hits served from the in-process fallback store."
        );
        describe_counter!(
            "scorta_cache_invalidation_total",
            Unit::Count,
            "Total number of invalidation sweeps triggered by mutating calls."
        );
        describe_histogram!(
            "scorta_cache_op_ms",
            Unit::Milliseconds,
            "Cache operation latency in milliseconds."
        );
    });
}
