//! Resilient logical channel sessions.
//!
//! A [`ConnectionSession`] is one named channel (`chat`, `notifications`)
//! with its own state machine, circuit breaker, retry schedule, outbound
//! queue, heartbeat and subscription table.

// ============================================================================
// Submodules
// ============================================================================

/// Session handle and lifecycle task.
pub mod core;

/// Session configuration.
pub mod options;

/// State, status and metrics types.
pub mod state;

/// Subscription table and callback isolation.
pub mod subscription;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::ConnectionSession;
pub use options::{NOTIFICATION_EVENT, SessionOptions};
pub use state::{ConnectionState, SessionMetrics, SessionStatus};
pub use subscription::{ErrorHandler, EventHandler, StateHandler};
