//! Typed channel wrappers.
//!
//! Thin layers over [`ConnectionSession::send`](crate::ConnectionSession::send)
//! and [`ConnectionSession::subscribe`](crate::ConnectionSession::subscribe)
//! that name the hub methods and decode event payloads.

/// Chat hub operations.
pub mod chat;

/// Notification hub operations.
pub mod notifications;

pub use chat::{ChatChannel, ChatMessage, Reaction};
pub use notifications::NotificationChannel;
