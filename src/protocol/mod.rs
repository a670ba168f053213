//! WebSocket protocol message types.
//!
//! This module defines the JSON frames exchanged by the built-in WebSocket
//! channel, plus the notification envelope carried inside event payloads.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Local → Remote | Remote method call |
//! | `Response` | Remote → Local | Call result or error |
//! | `Event` | Remote → Local | Server push |
//!
//! The session layer never looks at these frames directly; it talks to the
//! [`Channel`](crate::transport::Channel) abstraction.

// ============================================================================
// Submodules
// ============================================================================

/// Event message types.
pub mod event;

/// Notification envelope and content hashing.
pub mod notification;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{EVENT_FRAME_TYPE, Event};
pub use notification::NotificationEnvelope;
pub use request::{Request, Response, ResponseType};
