//! Per-class circuit breaker.
//!
//! One breaker guards one operation class (review / summary / skill), so a
//! failing class fast-fails without starving the others — a bulkhead, not a
//! global gate. All state lives in atomics mutated by compare-and-set; no
//! lock is ever held across a remote call.
//!
//! State machine:
//!
//! ```text
//! Closed --(threshold consecutive failures)--> Open
//! Open   --(open_duration elapsed)----------> Half-Open
//! Half-Open: exactly one probe admitted; concurrent callers rejected
//!   probe success --> Closed (counters reset)
//!   probe failure --> Open (fresh timer)
//! ```

use crate::resilience::ResilienceConfig;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Monotonic time source for the breaker.
///
/// Injected so tests can drive the open-window expiry with a manual clock
/// instead of sleeping.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;
}

/// Default clock backed by `Instant`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Operation class owning one breaker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Review-agent completion calls.
    Review,
    /// Summary/consolidation completion calls.
    Summary,
    /// Skill-prompt completion calls.
    Skill,
}

impl OperationClass {
    /// Stable lowercase name, used in errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Summary => "summary",
            Self::Skill => "skill",
        }
    }

    /// All classes, for iteration in telemetry surfaces.
    pub fn all() -> [OperationClass; 3] {
        [Self::Review, Self::Summary, Self::Skill]
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observable breaker state, derived from the atomics on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Every call is rejected without a remote attempt.
    Open,
    /// The open window elapsed; the next caller is admitted as a probe.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of asking the breaker for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Proceed with the call.
    Admitted,
    /// Proceed as the single half-open probe.
    AdmittedProbe,
    /// Fast-fail; do not attempt the call.
    Rejected,
}

impl BreakerDecision {
    /// Check whether the call may proceed.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Lock-free circuit breaker for one operation class.
///
/// `opened_at_ms == 0` is the closed sentinel; an open timestamp is clamped
/// to at least 1 so it can never collide with it.
#[derive(Debug)]
pub struct CircuitBreaker {
    class: OperationClass,
    failure_threshold: u32,
    open_duration_ms: u64,
    consecutive_failures: AtomicU32,
    opened_at_ms: AtomicU64,
    probe_in_flight: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a breaker with the system clock.
    pub fn new(class: OperationClass, config: &ResilienceConfig) -> Self {
        Self::with_clock(class, config, Arc::new(SystemClock::default()))
    }

    /// Create a breaker with an injected clock.
    pub fn with_clock(
        class: OperationClass,
        config: &ResilienceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            class,
            failure_threshold: config.failure_threshold.max(1),
            open_duration_ms: config.open_duration.as_millis() as u64,
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            clock,
        }
    }

    /// The operation class this breaker guards.
    pub fn class(&self) -> OperationClass {
        self.class
    }

    /// Ask for admission before a remote attempt.
    ///
    /// Closed admits everyone. Open rejects until the open window elapses.
    /// After that exactly one caller wins the probe CAS; everyone else keeps
    /// getting rejected until the probe resolves.
    pub fn try_acquire(&self) -> BreakerDecision {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        if opened == 0 {
            return BreakerDecision::Admitted;
        }

        let now = self.clock.now_ms();
        if now.saturating_sub(opened) < self.open_duration_ms {
            return BreakerDecision::Rejected;
        }

        // Open window elapsed: half-open. One probe only.
        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(class = self.class.as_str(), "circuit breaker admitting half-open probe");
            BreakerDecision::AdmittedProbe
        } else {
            BreakerDecision::Rejected
        }
    }

    /// Record a successful call. Closes the breaker and resets counters.
    pub fn record_success(&self) {
        let was_open = self.opened_at_ms.swap(0, Ordering::AcqRel) != 0;
        self.probe_in_flight.store(false, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        if was_open {
            debug!(class = self.class.as_str(), "circuit breaker closed after successful probe");
        }
    }

    /// Record a failed call.
    ///
    /// A failed half-open probe re-opens with a fresh timer. While closed,
    /// the consecutive-failure counter advances and opens the breaker once
    /// it reaches the threshold.
    pub fn record_failure(&self) {
        let now = self.clock.now_ms().max(1);

        if self
            .probe_in_flight
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.opened_at_ms.store(now, Ordering::Release);
            warn!(class = self.class.as_str(), "circuit breaker re-opened after failed probe");
            return;
        }

        if self.opened_at_ms.load(Ordering::Acquire) != 0 {
            // Already open; a straggler from before the trip changes nothing.
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_threshold
            && self
                .opened_at_ms
                .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            warn!(
                class = self.class.as_str(),
                failures, "circuit breaker opened"
            );
        }
    }

    /// Current observable state.
    pub fn state(&self) -> BreakerState {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        if opened == 0 {
            BreakerState::Closed
        } else if self.clock.now_ms().saturating_sub(opened) < self.open_duration_ms {
            BreakerState::Open
        } else {
            BreakerState::HalfOpen
        }
    }

    /// Consecutive failures seen since the last success, for telemetry.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }
}

/// One breaker per operation class — the bulkhead.
#[derive(Debug)]
pub struct BreakerSet {
    review: Arc<CircuitBreaker>,
    summary: Arc<CircuitBreaker>,
    skill: Arc<CircuitBreaker>,
}

impl BreakerSet {
    /// Build the full set from one configuration, system clock.
    pub fn new(config: &ResilienceConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::default());
        Self::with_clock(config, clock)
    }

    /// Build the full set with an injected clock shared by all classes.
    pub fn with_clock(config: &ResilienceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            review: Arc::new(CircuitBreaker::with_clock(
                OperationClass::Review,
                config,
                clock.clone(),
            )),
            summary: Arc::new(CircuitBreaker::with_clock(
                OperationClass::Summary,
                config,
                clock.clone(),
            )),
            skill: Arc::new(CircuitBreaker::with_clock(
                OperationClass::Skill,
                config,
                clock,
            )),
        }
    }

    /// Get the breaker owning the given class.
    pub fn for_class(&self, class: OperationClass) -> Arc<CircuitBreaker> {
        match class {
            OperationClass::Review => self.review.clone(),
            OperationClass::Summary => self.summary.clone(),
            OperationClass::Skill => self.skill.clone(),
        }
    }
}
