//! Session configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use realtime_link::{CircuitConfig, SessionOptions};
//!
//! let options = SessionOptions::notifications()
//!     .with_max_connect_attempts(10)
//!     .with_circuit(CircuitConfig::default().with_failure_threshold(3))
//!     .with_status_log_interval(Duration::from_secs(60));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::resilience::queue::{DEFAULT_QUEUE_CAPACITY, DEFAULT_QUEUE_MAX_ATTEMPTS};
use crate::resilience::{CircuitConfig, DedupConfig, HealthConfig, RetryPolicy};

// ============================================================================
// Constants
// ============================================================================

/// Default bound on opening a channel plus its first probe.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default attempts per connect cycle.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 15;

/// Default liveness probe method.
pub const DEFAULT_PROBE_METHOD: &str = "Ping";

/// Event carrying notifications.
pub const NOTIFICATION_EVENT: &str = "ReceiveNotification";

/// Default offline buffer per event on the notification session.
pub const DEFAULT_NOTIFICATION_BUFFER: usize = 50;

// ============================================================================
// SessionOptions
// ============================================================================

/// Configuration for one [`crate::ConnectionSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Bound on opening the channel plus the initial liveness probe.
    pub connect_timeout: Duration,

    /// Bound on a single direct remote call.
    pub call_timeout: Duration,

    /// Attempts per connect cycle before settling into `Failed`.
    pub max_connect_attempts: u32,

    /// Queue sends while the session is not ready.
    pub queue_when_disconnected: bool,

    /// Outbound queue cap. `None` means unbounded.
    pub queue_capacity: Option<usize>,

    /// Attempts per queued operation.
    pub queue_max_attempts: u32,

    /// Remote method used as the liveness probe.
    pub probe_method: String,

    /// Retry delays.
    pub retry: RetryPolicy,

    /// Seed for retry jitter. `None` seeds from OS entropy.
    pub retry_seed: Option<u64>,

    /// Circuit breaker.
    pub circuit: CircuitConfig,

    /// Heartbeat monitoring.
    pub health: HealthConfig,

    /// Inbound deduplication. `None` disables it.
    pub dedup: Option<DedupConfig>,

    /// Events passed through the deduplicator.
    pub dedup_events: Vec<String>,

    /// Events kept per name while nobody subscribes to it.
    pub event_buffer_capacity: usize,

    /// Emit a periodic status line while connected.
    pub status_log_interval: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            queue_when_disconnected: true,
            queue_capacity: Some(DEFAULT_QUEUE_CAPACITY),
            queue_max_attempts: DEFAULT_QUEUE_MAX_ATTEMPTS,
            probe_method: DEFAULT_PROBE_METHOD.to_string(),
            retry: RetryPolicy::default(),
            retry_seed: None,
            circuit: CircuitConfig::default(),
            health: HealthConfig::default(),
            dedup: None,
            dedup_events: Vec::new(),
            event_buffer_capacity: 0,
            status_log_interval: None,
        }
    }
}

// ============================================================================
// Presets
// ============================================================================

impl SessionOptions {
    /// Options for the chat session.
    #[inline]
    #[must_use]
    pub fn chat() -> Self {
        Self::default()
    }

    /// Options for the notification session: deduplicated and buffered.
    #[must_use]
    pub fn notifications() -> Self {
        Self {
            dedup: Some(DedupConfig::default()),
            dedup_events: vec![NOTIFICATION_EVENT.to_string()],
            event_buffer_capacity: DEFAULT_NOTIFICATION_BUFFER,
            ..Self::default()
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl SessionOptions {
    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-call timeout.
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the attempts per connect cycle.
    #[inline]
    #[must_use]
    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts;
        self
    }

    /// Enables or disables queuing while not ready.
    #[inline]
    #[must_use]
    pub fn with_queueing(mut self, enabled: bool) -> Self {
        self.queue_when_disconnected = enabled;
        self
    }

    /// Sets the outbound queue cap.
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the attempts per queued operation.
    #[inline]
    #[must_use]
    pub fn with_queue_max_attempts(mut self, attempts: u32) -> Self {
        self.queue_max_attempts = attempts;
        self
    }

    /// Sets the liveness probe method.
    #[inline]
    #[must_use]
    pub fn with_probe_method(mut self, method: impl Into<String>) -> Self {
        self.probe_method = method.into();
        self
    }

    /// Sets the retry policy.
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Makes retry jitter deterministic.
    #[inline]
    #[must_use]
    pub fn with_retry_seed(mut self, seed: u64) -> Self {
        self.retry_seed = Some(seed);
        self
    }

    /// Sets the circuit breaker configuration.
    #[inline]
    #[must_use]
    pub fn with_circuit(mut self, circuit: CircuitConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Sets the health monitor configuration.
    #[inline]
    #[must_use]
    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// Deduplicates `events` with `config`.
    #[must_use]
    pub fn with_dedup<I, S>(mut self, config: DedupConfig, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dedup = Some(config);
        self.dedup_events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Disables deduplication.
    #[inline]
    #[must_use]
    pub fn without_dedup(mut self) -> Self {
        self.dedup = None;
        self.dedup_events.clear();
        self
    }

    /// Sets the per-event offline buffer.
    #[inline]
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer_capacity = capacity;
        self
    }

    /// Enables periodic status logging.
    #[inline]
    #[must_use]
    pub fn with_status_log_interval(mut self, interval: Duration) -> Self {
        self.status_log_interval = Some(interval);
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SessionOptions {
    /// Checks the options for values that would stall a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.max_connect_attempts == 0 {
            return Err(Error::config("max_connect_attempts must be at least 1"));
        }
        if self.connect_timeout.is_zero() || self.call_timeout.is_zero() {
            return Err(Error::config("connect and call timeouts must be non-zero"));
        }
        if self.health.probe_interval.is_zero() || self.health.check_interval.is_zero() {
            return Err(Error::config("health intervals must be non-zero"));
        }
        if self.dedup.is_some_and(|d| d.window.is_zero()) {
            return Err(Error::config("dedup window must be non-zero"));
        }
        if self.status_log_interval.is_some_and(|i| i.is_zero()) {
            return Err(Error::config("status_log_interval must be non-zero"));
        }
        if self.probe_method.is_empty() {
            return Err(Error::config("probe_method must not be empty"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SessionOptions::default();
        assert_eq!(options.connect_timeout, Duration::from_secs(15));
        assert_eq!(options.call_timeout, Duration::from_secs(10));
        assert_eq!(options.max_connect_attempts, 15);
        assert_eq!(options.queue_capacity, Some(200));
        assert!(options.dedup.is_none());
        assert_eq!(options.event_buffer_capacity, 0);
    }

    #[test]
    fn test_notification_preset() {
        let options = SessionOptions::notifications();
        assert!(options.dedup.is_some());
        assert_eq!(options.dedup_events, vec![NOTIFICATION_EVENT]);
        assert_eq!(options.event_buffer_capacity, 50);
    }

    #[test]
    fn test_builder_chaining() {
        let options = SessionOptions::chat()
            .with_max_connect_attempts(4)
            .with_queueing(false)
            .with_retry_seed(7)
            .with_probe_method("Heartbeat");

        assert_eq!(options.max_connect_attempts, 4);
        assert!(!options.queue_when_disconnected);
        assert_eq!(options.retry_seed, Some(7));
        assert_eq!(options.probe_method, "Heartbeat");
    }

    #[test]
    fn test_without_dedup() {
        let options = SessionOptions::notifications().without_dedup();
        assert!(options.dedup.is_none());
        assert!(options.dedup_events.is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(SessionOptions::default().validate().is_ok());
        assert!(
            SessionOptions::default()
                .with_max_connect_attempts(0)
                .validate()
                .is_err()
        );
        assert!(
            SessionOptions::default()
                .with_call_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
