//! Circuit breaker guarding remote store access.
//!
//! Starts closed. Tracked failures increment a counter; at the threshold
//! the circuit opens and guarded calls are rejected without touching the
//! store. After the break duration the next `is_open` check closes the
//! circuit again and lets one probe call through; a failing probe reopens
//! it.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::error::CacheError;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::breaker";

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_BREAK_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct BreakerState {
    failures: u32,
    opened_at: Option<Instant>,
}

/// Tri-state failure guard. Half-open is not stored: it is derived from
/// `(opened_at, break_duration, now)` inside `is_open`.
pub struct CircuitBreaker {
    failure_threshold: u32,
    break_duration: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, break_duration: Duration) -> Self {
        Self {
            failure_threshold,
            break_duration,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Whether guarded calls are currently rejected.
    ///
    /// When the break duration has elapsed this check itself performs the
    /// half-open transition: the counter resets, the open timestamp clears,
    /// and the caller is allowed through as the probe.
    pub fn is_open(&self) -> bool {
        let mut state = mutex_lock(&self.state, SOURCE, "is_open");
        match state.opened_at {
            Some(opened_at) => {
                if opened_at.elapsed() > self.break_duration {
                    debug!("circuit break duration elapsed; allowing probe call");
                    state.opened_at = None;
                    state.failures = 0;
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    /// Record a failure against the breaker.
    ///
    /// Errors excluded from tracking (caller input, configuration) are
    /// ignored; they say nothing about the store's health.
    pub fn track(&self, error: &CacheError) {
        if !error.is_breaker_tracked() {
            return;
        }

        let mut state = mutex_lock(&self.state, SOURCE, "track");
        state.failures += 1;
        if state.failures >= self.failure_threshold && state.opened_at.is_none() {
            warn!(
                failures = state.failures,
                break_secs = self.break_duration.as_secs(),
                "circuit opened after repeated store failures"
            );
            state.opened_at = Some(Instant::now());
        }
    }

    /// Reset the failure counter after a successful guarded call.
    pub fn record_success(&self) {
        mutex_lock(&self.state, SOURCE, "record_success").failures = 0;
    }

    /// Current failure count, for operational introspection.
    pub fn failure_count(&self) -> u32 {
        mutex_lock(&self.state, SOURCE, "failure_count").failures
    }

    /// Manually open the circuit.
    pub fn open(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "open");
        state.failures = self.failure_threshold;
        state.opened_at = Some(Instant::now());
    }

    /// Manually close the circuit and clear the failure counter.
    pub fn reset(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "reset");
        state.failures = 0;
        state.opened_at = None;
    }

    /// Run `op` under breaker protection.
    ///
    /// Rejects with [`CacheError::CircuitOpen`] while open; otherwise runs
    /// the operation, tracks a failure on error, and propagates the original
    /// error either way.
    pub fn execute<T>(&self, op: impl FnOnce() -> Result<T, CacheError>) -> Result<T, CacheError> {
        if self.is_open() {
            return Err(CacheError::CircuitOpen);
        }

        match op() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.track(&err);
                Err(err)
            }
        }
    }

    /// Async counterpart of [`CircuitBreaker::execute`].
    pub async fn execute_async<T, Fut>(
        &self,
        op: impl FnOnce() -> Fut,
    ) -> Result<T, CacheError>
    where
        Fut: Future<Output = Result<T, CacheError>>,
    {
        if self.is_open() {
            return Err(CacheError::CircuitOpen);
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.track(&err);
                Err(err)
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_BREAK_DURATION)
    }
}
