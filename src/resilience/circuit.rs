//! Circuit breaker gating connection attempts.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────► Open
//!     ▲                                │ recovery_timeout elapsed
//!     │ half_open_max_calls successes  ▼
//!     └────────────────────────────  HalfOpen ──── any failure ───► Open
//! ```
//!
//! The failure count is only cleared on the `HalfOpen -> Closed` path or by
//! [`CircuitBreaker::reset`]. Successes while `Closed` leave it untouched, so
//! intermittent successes do not protect against an eventual trip.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default consecutive failures before opening.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time spent open before a half-open trial.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of trial attempts while half-open.
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 3;

// ============================================================================
// CircuitConfig
// ============================================================================

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitConfig {
    /// Failures while closed before the breaker opens.
    pub failure_threshold: u32,
    /// Time spent open before a half-open trial.
    pub recovery_timeout: Duration,
    /// Trial attempts permitted while half-open, and successes needed to close.
    pub half_open_max_calls: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
        }
    }
}

impl CircuitConfig {
    /// Sets the failure threshold.
    #[inline]
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the recovery timeout.
    #[inline]
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Sets the half-open trial budget.
    #[inline]
    #[must_use]
    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }
}

// ============================================================================
// CircuitState
// ============================================================================

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CircuitState {
    /// Attempts always permitted.
    Closed,
    /// Attempts refused.
    Open,
    /// A bounded number of trial attempts permitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

// ============================================================================
// CircuitBreaker
// ============================================================================

/// Tracks failures and decides whether a new attempt may be made.
///
/// Not internally synchronized; the owning session guards it.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    half_open_calls: u32,
    half_open_successes: u32,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config: CircuitConfig {
                failure_threshold: config.failure_threshold.max(1),
                half_open_max_calls: config.half_open_max_calls.max(1),
                ..config
            },
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            half_open_calls: 0,
            half_open_successes: 0,
        }
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Returns the stored state without applying the recovery timeout.
    #[inline]
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Returns the failure count.
    #[inline]
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Returns the state, reporting `HalfOpen` once the recovery timeout has
    /// elapsed even if no attempt has been made yet.
    #[must_use]
    pub fn current_state(&self, now: Instant) -> CircuitState {
        match self.state {
            CircuitState::Open if self.recovery_elapsed(now) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Time left before the breaker admits a trial. Zero unless open.
    #[must_use]
    pub fn time_until_retry(&self, now: Instant) -> Duration {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                (opened_at + self.config.recovery_timeout).saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        }
    }

    /// Returns `true` if [`Self::try_acquire`] would succeed, without
    /// consuming a half-open slot.
    #[must_use]
    pub fn allows_attempt(&self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.recovery_elapsed(now),
            CircuitState::HalfOpen => self.half_open_calls < self.config.half_open_max_calls,
        }
    }

    /// Asks permission for one attempt.
    ///
    /// Moves `Open -> HalfOpen` once the recovery timeout has elapsed.
    /// Each permitted half-open attempt consumes one trial slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] if the attempt is refused.
    pub fn try_acquire(&mut self, now: Instant) -> Result<()> {
        if self.state == CircuitState::Open && self.recovery_elapsed(now) {
            info!("Circuit breaker half-open, admitting trial attempts");
            self.state = CircuitState::HalfOpen;
            self.half_open_calls = 0;
            self.half_open_successes = 0;
        }

        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if self.half_open_calls < self.config.half_open_max_calls => {
                self.half_open_calls += 1;
                Ok(())
            }
            CircuitState::HalfOpen => Err(Error::circuit_open(0)),
            CircuitState::Open => Err(Error::circuit_open(
                self.time_until_retry(now).as_millis() as u64,
            )),
        }
    }

    /// Records a successful attempt.
    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.half_open_successes += 1;
            if self.half_open_successes >= self.config.half_open_max_calls {
                info!("Circuit breaker closed");
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.opened_at = None;
                self.half_open_calls = 0;
                self.half_open_successes = 0;
            }
        }
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);

        match self.state {
            CircuitState::Closed if self.failure_count >= self.config.failure_threshold => {
                warn!(failures = self.failure_count, "Circuit breaker opened");
                self.open(now);
            }
            CircuitState::HalfOpen => {
                warn!("Half-open trial failed, circuit breaker reopened");
                self.open(now);
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    /// Forces the breaker back to `Closed` with no recorded failures.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
        self.half_open_calls = 0;
        self.half_open_successes = 0;
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_calls = 0;
        self.half_open_successes = 0;
    }

    fn recovery_elapsed(&self, now: Instant) -> bool {
        self.opened_at.is_none_or(|opened_at| {
            now.saturating_duration_since(opened_at) >= self.config.recovery_timeout
        })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

// ============================================================================
// Tests
// ============================================================================
