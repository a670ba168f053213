//! Heartbeat-based health monitoring.
//!
//! While a session is connected the monitor sends a liveness probe every
//! `probe_interval` and checks every `check_interval` whether the channel
//! should be declared unhealthy:
//!
//! - `missed_count >= max_missed_probes`
//! - time since the last acknowledgement exceeds `heartbeat_timeout`
//! - the transport reports itself closed
//!
//! [`HealthMonitor::run`] returns the first [`UnhealthyReason`] it finds. The
//! caller closes the channel and goes through its normal failure path.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::future::{BoxFuture, OptionFuture};
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::transport::Channel;

// ============================================================================
// Constants
// ============================================================================

/// Default probe interval.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Default health check interval.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Default missed probes before the channel is unhealthy.
pub const DEFAULT_MAX_MISSED_PROBES: u32 = 3;

/// Default maximum time without an acknowledgement.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// HealthConfig
// ============================================================================

/// Health monitor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// Interval between liveness probes.
    pub probe_interval: Duration,
    /// Interval between health evaluations.
    pub check_interval: Duration,
    /// Missed probes tolerated.
    pub max_missed_probes: u32,
    /// Maximum time without an acknowledgement.
    pub heartbeat_timeout: Duration,
    /// Timeout for a single probe.
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
            check_interval: DEFAULT_CHECK_INTERVAL,
            max_missed_probes: DEFAULT_MAX_MISSED_PROBES,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl HealthConfig {
    /// Sets the probe interval.
    #[inline]
    #[must_use]
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Sets the check interval.
    #[inline]
    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Sets the missed probe tolerance.
    #[inline]
    #[must_use]
    pub fn with_max_missed_probes(mut self, max: u32) -> Self {
        self.max_missed_probes = max;
        self
    }

    /// Sets the heartbeat timeout.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the single probe timeout.
    #[inline]
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

// ============================================================================
// HeartbeatRecord
// ============================================================================

/// Probe bookkeeping for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatRecord {
    /// When the last probe was sent.
    pub last_sent_at: Option<Instant>,
    /// When the last probe was acknowledged.
    pub last_ack_at: Option<Instant>,
    /// Consecutive probes without acknowledgement.
    pub missed_count: u32,
}

// ============================================================================
// UnhealthyReason
// ============================================================================

/// Why a channel was declared unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnhealthyReason {
    /// Too many consecutive probes went unanswered.
    MissedProbes {
        /// Consecutive misses.
        missed: u32,
    },
    /// No acknowledgement within the heartbeat timeout.
    AckTimeout {
        /// Time since the last acknowledgement.
        since_last_ack: Duration,
    },
    /// The transport reports itself closed.
    TransportClosed,
}

impl fmt::Display for UnhealthyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissedProbes { missed } => write!(f, "{missed} missed heartbeat probes"),
            Self::AckTimeout { since_last_ack } => {
                write!(f, "no heartbeat ack for {}ms", since_last_ack.as_millis())
            }
            Self::TransportClosed => f.write_str("transport closed"),
        }
    }
}

impl From<UnhealthyReason> for Error {
    fn from(reason: UnhealthyReason) -> Self {
        Error::transport_closed(format!("unhealthy: {reason}"))
    }
}

// ============================================================================
// HealthObserver
// ============================================================================

/// Receives monitor activity.
pub trait HealthObserver: Send + Sync {
    /// A probe was acknowledged after `rtt`.
    fn probe_acknowledged(&self, rtt: Duration);

    /// A probe failed or timed out.
    fn probe_missed(&self, _error: &Error) {}

    /// A health evaluation ran at `at`.
    fn health_checked(&self, at: SystemTime);
}

// ============================================================================
// HealthMonitor
// ============================================================================

type ProbeFuture = BoxFuture<'static, (Instant, Result<Value>)>;

/// Heartbeat monitor for one live channel.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    config: HealthConfig,
    record: HeartbeatRecord,
}

impl HealthMonitor {
    /// Creates a monitor for a channel whose liveness was just confirmed at
    /// `connected_at`.
    #[must_use]
    pub fn new(config: HealthConfig, connected_at: Instant) -> Self {
        Self {
            config,
            record: HeartbeatRecord {
                last_sent_at: None,
                last_ack_at: Some(connected_at),
                missed_count: 0,
            },
        }
    }

    /// Returns the heartbeat record.
    #[inline]
    #[must_use]
    pub fn record(&self) -> &HeartbeatRecord {
        &self.record
    }

    /// Records an outgoing probe.
    pub fn record_sent(&mut self, at: Instant) {
        self.record.last_sent_at = Some(at);
    }

    /// Records an acknowledgement.
    pub fn record_ack(&mut self, at: Instant) {
        self.record.last_ack_at = Some(at);
        self.record.missed_count = 0;
    }

    /// Records a missed probe.
    pub fn record_miss(&mut self) {
        self.record.missed_count = self.record.missed_count.saturating_add(1);
    }

    /// Evaluates channel health.
    ///
    /// # Errors
    ///
    /// Returns the first [`UnhealthyReason`] that applies.
    pub fn evaluate(&self, now: Instant, transport_open: bool) -> std::result::Result<(), UnhealthyReason> {
        if !transport_open {
            return Err(UnhealthyReason::TransportClosed);
        }

        if self.record.missed_count >= self.config.max_missed_probes {
            return Err(UnhealthyReason::MissedProbes {
                missed: self.record.missed_count,
            });
        }

        if let Some(last_ack) = self.record.last_ack_at {
            let since_last_ack = now.saturating_duration_since(last_ack);
            if since_last_ack > self.config.heartbeat_timeout {
                return Err(UnhealthyReason::AckTimeout { since_last_ack });
            }
        }

        Ok(())
    }

    /// Probes `channel` until it is declared unhealthy.
    ///
    /// Cancel by dropping the future. A remote error answer still proves the
    /// channel is alive and counts as an acknowledgement.
    pub async fn run(
        &mut self,
        channel: Arc<dyn Channel>,
        probe_method: &str,
        observer: &dyn HealthObserver,
    ) -> UnhealthyReason {
        let start = Instant::now();
        let mut probe_tick = interval_at(start + self.config.probe_interval, self.config.probe_interval);
        probe_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut check_tick = interval_at(start + self.config.check_interval, self.config.check_interval);
        check_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut in_flight: Option<ProbeFuture> = None;

        loop {
            tokio::select! {
                _ = probe_tick.tick() => {
                    if in_flight.is_some() {
                        trace!("Previous probe still outstanding, skipping tick");
                        continue;
                    }
                    let sent_at = Instant::now();
                    self.record_sent(sent_at);
                    in_flight = Some(self.probe(Arc::clone(&channel), probe_method, sent_at));
                }

                Some((sent_at, result)) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                    in_flight = None;
                    match result {
                        Ok(_) | Err(Error::Remote { .. }) => {
                            let now = Instant::now();
                            self.record_ack(now);
                            trace!(rtt_ms = (now - sent_at).as_millis() as u64, "Heartbeat acknowledged");
                            observer.probe_acknowledged(now - sent_at);
                        }
                        Err(e) => {
                            self.record_miss();
                            debug!(missed = self.record.missed_count, error = %e, "Heartbeat probe missed");
                            observer.probe_missed(&e);
                        }
                    }
                }

                _ = check_tick.tick() => {
                    observer.health_checked(SystemTime::now());
                    if let Err(reason) = self.evaluate(Instant::now(), channel.is_open()) {
                        warn!(%reason, "Channel declared unhealthy");
                        return reason;
                    }
                }
            }
        }
    }

    fn probe(&self, channel: Arc<dyn Channel>, method: &str, sent_at: Instant) -> ProbeFuture {
        let method = method.to_string();
        let probe_timeout = self.config.probe_timeout;
        Box::pin(async move {
            let result = match timeout(probe_timeout, channel.invoke(&method, Vec::new())).await {
                Ok(result) => result,
                Err(_) => Err(Error::request_timeout(method, probe_timeout.as_millis() as u64)),
            };
            (sent_at, result)
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use url::Url;

    use crate::credential::Credential;
    use crate::transport::ChannelFactory;
    use crate::transport::mock::{MockConnector, MockReply};

    #[derive(Default)]
    struct Counts {
        acks: AtomicU32,
        misses: AtomicU32,
        checks: AtomicU32,
    }

    impl HealthObserver for Counts {
        fn probe_acknowledged(&self, _rtt: Duration) {
            self.acks.fetch_add(1, Ordering::SeqCst);
        }

        fn probe_missed(&self, _error: &Error) {
            self.misses.fetch_add(1, Ordering::SeqCst);
        }

        fn health_checked(&self, _at: SystemTime) {
            self.checks.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn open(connector: &MockConnector) -> Arc<dyn Channel> {
        let endpoint = Url::parse("ws://test/hub").expect("url");
        connector
            .open(&endpoint, &Credential::new("t"))
            .await
            .expect("open")
            .channel
    }

    #[test]
    fn test_fresh_monitor_is_healthy() {
        let now = Instant::now();
        let monitor = HealthMonitor::new(HealthConfig::default(), now);
        assert!(monitor.evaluate(now + Duration::from_secs(30), true).is_ok());
    }

    #[test]
    fn test_missed_probes_unhealthy() {
        let now = Instant::now();
        let mut monitor = HealthMonitor::new(HealthConfig::default(), now);
        monitor.record_miss();
        monitor.record_miss();
        assert!(monitor.evaluate(now, true).is_ok());

        monitor.record_miss();
        assert_eq!(
            monitor.evaluate(now, true),
            Err(UnhealthyReason::MissedProbes { missed: 3 })
        );

        monitor.record_ack(now);
        assert_eq!(monitor.record().missed_count, 0);
    }

    #[test]
    fn test_ack_timeout_unhealthy() {
        let now = Instant::now();
        let monitor = HealthMonitor::new(HealthConfig::default(), now);
        let later = now + Duration::from_secs(31);
        assert!(matches!(
            monitor.evaluate(later, true),
            Err(UnhealthyReason::AckTimeout { .. })
        ));
    }

    #[test]
    fn test_transport_closed_unhealthy() {
        let now = Instant::now();
        let monitor = HealthMonitor::new(HealthConfig::default(), now);
        assert_eq!(
            monitor.evaluate(now, false),
            Err(UnhealthyReason::TransportClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stays_healthy_while_acked() {
        let connector = MockConnector::new();
        let channel = open(&connector).await;
        let counts = Counts::default();
        let mut monitor = HealthMonitor::new(HealthConfig::default(), Instant::now());

        let outcome = timeout(
            Duration::from_secs(100),
            monitor.run(channel, "Ping", &counts),
        )
        .await;

        assert!(outcome.is_err(), "monitor should still be running");
        assert!(counts.acks.load(Ordering::SeqCst) >= 6);
        assert!(counts.checks.load(Ordering::SeqCst) >= 19);
        assert_eq!(counts.misses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_detects_silent_server() {
        let connector = MockConnector::new();
        connector.set_responder(|_, _| MockReply::Hang);
        let channel = open(&connector).await;
        let counts = Counts::default();
        let mut monitor = HealthMonitor::new(HealthConfig::default(), Instant::now());

        let reason = monitor.run(channel, "Ping", &counts).await;

        assert!(matches!(reason, UnhealthyReason::AckTimeout { .. }));
        assert_eq!(counts.acks.load(Ordering::SeqCst), 0);
        assert!(counts.misses.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_detects_closed_transport() {
        let connector = MockConnector::new();
        let channel = open(&connector).await;
        connector.last_channel().expect("channel").go_silent_closed();
        let counts = Counts::default();
        let mut monitor = HealthMonitor::new(HealthConfig::default(), Instant::now());

        let started = Instant::now();
        let reason = monitor.run(channel, "Ping", &counts).await;

        assert_eq!(reason, UnhealthyReason::TransportClosed);
        assert!(started.elapsed() <= DEFAULT_CHECK_INTERVAL + Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error_counts_as_ack() {
        let connector = MockConnector::new();
        connector.set_responder(|_, _| MockReply::Remote("unknown_method"));
        let channel = open(&connector).await;
        let counts = Counts::default();
        let mut monitor = HealthMonitor::new(HealthConfig::default(), Instant::now());

        let outcome = timeout(
            Duration::from_secs(61),
            monitor.run(channel, "Ping", &counts),
        )
        .await;

        assert!(outcome.is_err());
        assert!(counts.acks.load(Ordering::SeqCst) >= 3);
    }
}
