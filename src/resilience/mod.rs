//! Resilience layer: retry with jittered backoff plus per-class circuit
//! breakers.
//!
//! ## Components
//!
//! - [`ResilienceConfig`]: one value object carrying every tuning knob
//! - [`RetryPolicy`]: transience classification and backoff computation
//! - [`CircuitBreaker`]: lock-free closed/open/half-open state machine
//! - [`BreakerSet`]: one breaker per operation class (bulkhead)
//!
//! Every component takes its configuration by value. There is no global
//! state: breakers are constructed explicitly and injected into the executor.

pub mod breaker;
pub mod retry;

pub use breaker::{
    BreakerDecision, BreakerSet, BreakerState, CircuitBreaker, Clock, OperationClass, SystemClock,
};
pub use retry::{ErrorClass, RetryPolicy};

use std::time::Duration;

/// Tuning knobs for the resilience layer.
///
/// One value object instead of scattered constants: the failure threshold and
/// open duration feed the breaker, the backoff base/cap and attempt budget
/// feed the retry policy, and the call timeout bounds each remote attempt.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Consecutive failures that open a breaker.
    pub failure_threshold: u32,
    /// How long an open breaker fast-fails before admitting a probe.
    pub open_duration: Duration,
    /// Base backoff for the first retry, in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound on the computed backoff, in milliseconds.
    pub backoff_cap_ms: u64,
    /// Total attempt budget per pass (first attempt included).
    pub max_attempts: u32,
    /// Per-call timeout enforced around each remote attempt.
    pub call_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            max_attempts: 3,
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl ResilienceConfig {
    /// Set the consecutive-failure threshold that opens a breaker.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set how long an open breaker fast-fails.
    pub fn with_open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }

    /// Set the backoff base and cap in milliseconds.
    pub fn with_backoff(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_cap_ms = cap_ms;
        self
    }

    /// Set the per-pass attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}
