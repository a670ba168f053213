//! Inbound event deduplication.
//!
//! Remembers when each hash was last delivered and suppresses repeats that
//! arrive within the window. A sweep evicts entries older than twice the
//! window.

// ============================================================================
// Imports
// ============================================================================

use std::hash::{Hash, Hasher};
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHasher};
use serde_json::Value;
use tokio::time::Instant;
use tracing::trace;

use crate::protocol::NotificationEnvelope;

// ============================================================================
// Constants
// ============================================================================

/// Default deduplication window.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

// ============================================================================
// DedupConfig
// ============================================================================

/// Deduplicator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupConfig {
    /// Repeats within this span are suppressed. Also the sweep interval.
    pub window: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

impl DedupConfig {
    /// Sets the window.
    #[inline]
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

// ============================================================================
// Deduplicator
// ============================================================================

/// Time-windowed duplicate filter.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    window: Duration,
    seen: FxHashMap<u64, Instant>,
    suppressed: u64,
}

impl Deduplicator {
    /// Creates an empty deduplicator.
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        Self {
            window: config.window,
            seen: FxHashMap::default(),
            suppressed: 0,
        }
    }

    /// Returns the window.
    #[inline]
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of tracked hashes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` if nothing is tracked.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Duplicates suppressed so far.
    #[inline]
    #[must_use]
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    /// Returns `true` if `hash` should be delivered, recording it.
    pub fn check(&mut self, hash: u64, now: Instant) -> bool {
        if self.is_duplicate(hash, now) {
            self.suppressed += 1;
            return false;
        }
        self.seen.insert(hash, now);
        true
    }

    /// Checks an envelope by delivery ID and by content.
    ///
    /// Either identity matching within the window suppresses it.
    pub fn check_envelope(&mut self, envelope: &NotificationEnvelope, now: Instant) -> bool {
        let content = envelope.content_hash();
        let id = (!envelope.id.is_empty()).then(|| envelope.id_hash());

        let duplicate =
            self.is_duplicate(content, now) || id.is_some_and(|id| self.is_duplicate(id, now));
        if duplicate {
            trace!(id = %envelope.id, kind = %envelope.kind, "Duplicate notification suppressed");
            self.suppressed += 1;
            return false;
        }

        self.seen.insert(content, now);
        if let Some(id) = id {
            self.seen.insert(id, now);
        }
        true
    }

    /// Checks an event payload.
    ///
    /// Payloads that parse as a [`NotificationEnvelope`] use
    /// [`Self::check_envelope`]; anything else is hashed as JSON text.
    pub fn check_value(&mut self, payload: &Value, now: Instant) -> bool {
        match NotificationEnvelope::from_value(payload) {
            Ok(envelope) => self.check_envelope(&envelope, now),
            Err(_) => {
                let mut hasher = FxHasher::default();
                payload.to_string().hash(&mut hasher);
                self.check(hasher.finish(), now)
            }
        }
    }

    /// Evicts entries older than twice the window. Returns the number evicted.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let horizon = self.window * 2;
        let before = self.seen.len();
        self.seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < horizon);
        before - self.seen.len()
    }

    fn is_duplicate(&self, hash: u64, now: Instant) -> bool {
        self.seen
            .get(&hash)
            .is_some_and(|seen_at| now.saturating_duration_since(*seen_at) < self.window)
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn notification(id: &str) -> Value {
        json!({
            "id": id,
            "type": "comment",
            "payload": {"recipientId": "u-1", "message": "Bo commented", "postId": "p-7"},
            "createdAt": "2024-05-01T10:00:00Z",
            "isRead": false
        })
    }

    #[test]
    fn test_within_window_delivers_once() {
        let now = Instant::now();
        let mut dedup = Deduplicator::default();

        assert!(dedup.check_value(&notification("n-1"), now));
        assert!(!dedup.check_value(&notification("n-1"), now + Duration::from_secs(2)));
        assert_eq!(dedup.suppressed_count(), 1);
    }

    #[test]
    fn test_after_window_delivers_again() {
        let now = Instant::now();
        let mut dedup = Deduplicator::default();

        assert!(dedup.check_value(&notification("n-1"), now));
        let later = now + DEFAULT_DEDUP_WINDOW + Duration::from_millis(1);
        assert!(dedup.check_value(&notification("n-2"), later));
    }

    #[test]
    fn test_resend_with_new_id_is_suppressed() {
        let now = Instant::now();
        let mut dedup = Deduplicator::default();

        assert!(dedup.check_value(&notification("n-1"), now));
        assert!(!dedup.check_value(&notification("n-99"), now + Duration::from_secs(1)));
    }

    #[test]
    fn test_different_content_is_delivered() {
        let now = Instant::now();
        let mut dedup = Deduplicator::default();
        let mut other = notification("n-2");
        other["payload"]["message"] = json!("Cy commented");

        assert!(dedup.check_value(&notification("n-1"), now));
        assert!(dedup.check_value(&other, now));
    }

    #[test]
    fn test_non_envelope_payload_hashed_as_text() {
        let now = Instant::now();
        let mut dedup = Deduplicator::default();

        assert!(dedup.check_value(&json!("ping"), now));
        assert!(!dedup.check_value(&json!("ping"), now));
        assert!(dedup.check_value(&json!("pong"), now));
    }

    #[test]
    fn test_sweep_evicts_old_entries() {
        let now = Instant::now();
        let mut dedup = Deduplicator::default();
        dedup.check(1, now);
        dedup.check(2, now + Duration::from_secs(8));

        let evicted = dedup.sweep(now + Duration::from_secs(10));
        assert_eq!(evicted, 1);
        assert_eq!(dedup.len(), 1);
    }
}
