//! Transience classification and jittered exponential backoff.
//!
//! A failed attempt is retried only when the failure looks transient:
//! timeouts, rate limits, connection resets, and "temporarily unavailable"
//! style outages. Everything else — rejected credentials, malformed
//! requests, exhausted quotas — fails the pass immediately regardless of the
//! remaining attempt budget.

use crate::errors::CompletionError;
use crate::resilience::ResilienceConfig;
use rand::Rng;
use std::time::Duration;

/// Message signatures that mark an untyped remote failure as transient.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "429",
    "rate limit",
    "too many requests",
    "connection reset",
    "connection refused",
    "broken pipe",
    "temporarily unavailable",
    "service unavailable",
    "overloaded",
];

/// Classification of a completion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying within the attempt budget.
    Transient,
    /// Zero retries; the pass fails now.
    Permanent,
}

impl ErrorClass {
    /// Check whether this class permits a retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Retry policy: classifies failures and computes backoff delays.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: ResilienceConfig,
}

impl RetryPolicy {
    /// Create a policy from a resilience configuration.
    pub fn new(config: ResilienceConfig) -> Self {
        Self { config }
    }

    /// Total attempt budget per pass, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Classify a completion failure.
    ///
    /// Typed transient variants (timeout, rate limit, reset, unavailable)
    /// classify directly. Untyped `Remote` failures are matched against the
    /// known transient message signatures. Breaker rejections are permanent:
    /// the breaker's open window outlasts any in-budget backoff.
    pub fn classify(&self, error: &CompletionError) -> ErrorClass {
        match error {
            CompletionError::Timeout { .. }
            | CompletionError::RateLimited(_)
            | CompletionError::ConnectionReset(_)
            | CompletionError::Unavailable(_) => ErrorClass::Transient,
            CompletionError::Auth(_)
            | CompletionError::InvalidRequest(_)
            | CompletionError::QuotaExhausted(_)
            | CompletionError::BreakerOpen { .. } => ErrorClass::Permanent,
            CompletionError::Remote(message) => {
                let lower = message.to_lowercase();
                if TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
        }
    }

    /// Backoff before retry attempt `attempt` (1-based: the wait after the
    /// first failure is `backoff_delay(1)`).
    ///
    /// The deterministic part is `min(base * 2^(attempt-1), cap)`; a uniform
    /// jitter in `[0, backoff)` is added on top so synchronized callers
    /// spread out.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let backoff = self.base_backoff_ms(attempt);
        let jitter = if backoff == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..backoff)
        };
        Duration::from_millis(backoff + jitter)
    }

    /// The deterministic backoff component, exposed for tests.
    pub fn base_backoff_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(32);
        self.config
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.backoff_cap_ms)
    }
}
