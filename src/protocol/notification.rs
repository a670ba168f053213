//! Notification envelope delivered on the notification channel.
//!
//! Identity is the server-assigned `id`. A content hash over
//! `(type, recipient, message, related entity ids)` serves as a secondary
//! identity so the deduplicator can catch server-side re-sends that arrive
//! with a fresh delivery ID.

// ============================================================================
// Imports
// ============================================================================

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// NotificationEnvelope
// ============================================================================

/// A notification pushed by the server.
///
/// # Format
///
/// ```json
/// {
///   "id": "n-81",
///   "type": "friend_request",
///   "payload": { "recipientId": "u-1", "message": "Ana sent you a request", "senderId": "u-9" },
///   "createdAt": "2024-05-01T10:00:00Z",
///   "isRead": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    /// Delivery ID.
    pub id: String,

    /// Notification kind.
    #[serde(rename = "type")]
    pub kind: String,

    /// Kind-specific fields.
    #[serde(default)]
    pub payload: Map<String, Value>,

    /// Server creation timestamp (RFC 3339).
    #[serde(rename = "createdAt", default)]
    pub created_at: String,

    /// Whether the user already read it.
    #[serde(rename = "isRead", default)]
    pub is_read: bool,
}

impl NotificationEnvelope {
    /// Parses an envelope from an event payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the payload is not an envelope.
    pub fn from_value(value: &Value) -> crate::Result<Self> {
        Ok(Self::deserialize(value)?)
    }

    /// Recipient user ID, if present.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.payload
            .get("recipientId")
            .or_else(|| self.payload.get("recipient"))
            .and_then(Value::as_str)
    }

    /// Human-readable message, if present.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }

    /// Related entity IDs, in key order.
    ///
    /// Uses the explicit `relatedEntityIds` field when the server sends one,
    /// otherwise every `*Id` field of the payload except the recipient.
    #[must_use]
    pub fn related_entity_ids(&self) -> Vec<(&str, String)> {
        if let Some(related) = self.payload.get("relatedEntityIds") {
            return vec![("relatedEntityIds", related.to_string())];
        }

        self.payload
            .iter()
            .filter(|(key, _)| key.ends_with("Id") && key.as_str() != "recipientId")
            .map(|(key, value)| (key.as_str(), value.to_string()))
            .collect()
    }

    /// Hash of the semantic content, independent of the delivery ID.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.kind.hash(&mut hasher);
        self.recipient().hash(&mut hasher);
        self.message().hash(&mut hasher);
        for (key, value) in self.related_entity_ids() {
            key.hash(&mut hasher);
            value.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Hash of the delivery ID.
    #[must_use]
    pub fn id_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        "id".hash(&mut hasher);
        self.id.hash(&mut hasher);
        hasher.finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(id: &str, message: &str) -> NotificationEnvelope {
        NotificationEnvelope::from_value(&json!({
            "id": id,
            "type": "friend_request",
            "payload": {"recipientId": "u-1", "message": message, "senderId": "u-9"},
            "createdAt": "2024-05-01T10:00:00Z",
            "isRead": false
        }))
        .expect("valid envelope")
    }

    #[test]
    fn test_parse_envelope() {
        let n = envelope("n-1", "Ana sent you a request");
        assert_eq!(n.kind, "friend_request");
        assert_eq!(n.recipient(), Some("u-1"));
        assert_eq!(n.message(), Some("Ana sent you a request"));
        assert!(!n.is_read);
    }

    #[test]
    fn test_content_hash_ignores_delivery_id() {
        let a = envelope("n-1", "hello");
        let b = envelope("n-2", "hello");
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.id_hash(), b.id_hash());
    }

    #[test]
    fn test_content_hash_depends_on_message() {
        let a = envelope("n-1", "hello");
        let b = envelope("n-1", "goodbye");
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_related_ids_exclude_recipient() {
        let n = envelope("n-1", "hello");
        let related = n.related_entity_ids();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].0, "senderId");
    }

    #[test]
    fn test_explicit_related_entity_ids_win() {
        let n = NotificationEnvelope::from_value(&json!({
            "id": "n-3",
            "type": "comment",
            "payload": {"relatedEntityIds": ["p-1", "c-2"], "postId": "p-1"}
        }))
        .expect("valid envelope");
        assert_eq!(n.related_entity_ids().len(), 1);
    }

    #[test]
    fn test_invalid_envelope_is_error() {
        assert!(NotificationEnvelope::from_value(&json!({"type": "x"})).is_err());
    }
}
