//! Event message types.
//!
//! Events are notifications pushed by the server to the local end, e.g. a
//! new chat message or a notification.
//!
//! # Format
//!
//! ```json
//! {
//!   "type": "event",
//!   "method": "ReceiveNotification",
//!   "params": { ... }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Constants
// ============================================================================

/// Value of the `type` discriminator for event frames.
pub const EVENT_FRAME_TYPE: &str = "event";

// ============================================================================
// Event
// ============================================================================

/// A named event pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Frame type marker (always "event").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event name.
    pub method: String,

    /// Event payload.
    #[serde(default)]
    pub params: Value,
}

impl Event {
    /// Creates a new event frame.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            event_type: EVENT_FRAME_TYPE.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Returns `true` if the frame carries the event discriminator.
    #[inline]
    #[must_use]
    pub fn is_event(&self) -> bool {
        self.event_type == EVENT_FRAME_TYPE
    }

    /// Gets a string value from the params.
    ///
    /// Returns empty string if key not found or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_parse() {
        let json_str = r#"{
            "type": "event",
            "method": "ReceiveMessage",
            "params": {"senderId": "u-1", "content": "hi"}
        }"#;

        let event: Event = serde_json::from_str(json_str).expect("parse");
        assert!(event.is_event());
        assert_eq!(event.method, "ReceiveMessage");
        assert_eq!(event.get_string("senderId"), "u-1");
        assert_eq!(event.get_string("missing"), "");
    }

    #[test]
    fn test_event_params_default_to_null() {
        let json_str = r#"{"type": "event", "method": "Refresh"}"#;
        let event: Event = serde_json::from_str(json_str).expect("parse");
        assert!(event.params.is_null());
    }

    #[test]
    fn test_event_new_sets_discriminator() {
        let event = Event::new("ReceiveNotification", json!({"id": "n-1"}));
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"type\":\"event\""));
    }
}
