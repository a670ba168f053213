//! Retry delay scheduling.
//!
//! The first few attempts after a failure use a short fixed delay; after
//! that the delay grows exponentially up to a cap, with symmetric jitter.
//!
//! The pre-jitter curve is exposed as [`RetryPolicy::base_delay`] so it can
//! be checked independently of the random source.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

// ============================================================================
// Constants
// ============================================================================

/// Default number of quick retries.
pub const DEFAULT_QUICK_RETRY_ATTEMPTS: u32 = 3;

/// Default quick retry delay.
pub const DEFAULT_QUICK_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default exponential base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default exponential growth factor.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;

/// Default delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default jitter, as a fraction of the computed delay.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

// ============================================================================
// RetryPolicy
// ============================================================================

/// Retry delay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempt indices below this use `quick_retry_delay`.
    pub quick_retry_attempts: u32,
    /// Fixed delay for quick retries.
    pub quick_retry_delay: Duration,
    /// Exponential base.
    pub base_delay: Duration,
    /// Exponential growth factor.
    pub backoff_factor: f64,
    /// Upper bound for the pre-jitter delay.
    pub max_delay: Duration,
    /// Symmetric jitter fraction, clamped to `0.0..=1.0`.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            quick_retry_attempts: DEFAULT_QUICK_RETRY_ATTEMPTS,
            quick_retry_delay: DEFAULT_QUICK_RETRY_DELAY,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Sets the quick retry window.
    #[inline]
    #[must_use]
    pub fn with_quick_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.quick_retry_attempts = attempts;
        self.quick_retry_delay = delay;
        self
    }

    /// Sets the exponential base delay.
    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the exponential growth factor.
    #[inline]
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Sets the delay cap.
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the jitter fraction.
    #[inline]
    #[must_use]
    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Returns `true` if `index` falls in the quick retry window.
    #[inline]
    #[must_use]
    pub fn is_quick_retry(&self, index: u32) -> bool {
        index < self.quick_retry_attempts
    }

    /// Pre-jitter delay for attempt `index`.
    ///
    /// Quick retries return the fixed delay. Later attempts return
    /// `min(base_delay * backoff_factor^index, max_delay)`.
    #[must_use]
    pub fn base_delay(&self, index: u32) -> Duration {
        if self.is_quick_retry(index) {
            return self.quick_retry_delay;
        }

        let exponent = i32::try_from(index).unwrap_or(i32::MAX);
        let factor = self.backoff_factor.max(1.0).powi(exponent);
        let nanos = self.base_delay.as_nanos() as f64 * factor;
        let cap = self.max_delay.as_nanos() as f64;

        if !nanos.is_finite() || nanos >= cap {
            self.max_delay
        } else {
            Duration::from_nanos(nanos.round() as u64)
        }
    }

    /// Delay for attempt `index`, with jitter drawn from `rng`.
    ///
    /// Quick retries are not jittered.
    pub fn delay<R: Rng + ?Sized>(&self, index: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(index);
        let jitter = self.jitter_factor.clamp(0.0, 1.0);

        if self.is_quick_retry(index) || base.is_zero() || jitter == 0.0 {
            return base;
        }

        let spread: f64 = rng.gen_range(-jitter..=jitter);
        let nanos = base.as_nanos() as f64 * (1.0 + spread);
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }
}

// ============================================================================
// RetryAttempt
// ============================================================================

/// One scheduled retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// Zero-based index of the failed attempt.
    pub index: u32,
    /// Time since the first failure of the current cycle.
    pub elapsed_since_first_failure: Duration,
    /// Delay before the next attempt.
    pub delay: Duration,
}

// ============================================================================
// RetryScheduler
// ============================================================================

/// Computes retry delays from a [`RetryPolicy`] and an owned RNG.
///
/// Seeded schedulers are fully deterministic.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    rng: SmallRng,
}

impl RetryScheduler {
    /// Creates a scheduler seeded from OS entropy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Creates a deterministic scheduler.
    #[must_use]
    pub fn with_seed(policy: RetryPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Returns the policy.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Schedules the retry after failed attempt `index`.
    pub fn schedule(&mut self, index: u32, elapsed_since_first_failure: Duration) -> RetryAttempt {
        RetryAttempt {
            index,
            elapsed_since_first_failure,
            delay: self.policy.delay(index, &mut self.rng),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
