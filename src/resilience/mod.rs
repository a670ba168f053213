//! Resilience primitives.
//!
//! Each primitive is a plain synchronous state holder, except the health
//! monitor's probe loop. The session serializes access to all of them.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `retry` | Quick-retry then exponential backoff with jitter |
//! | `circuit` | Closed / Open / HalfOpen attempt gate |
//! | `queue` | Outbound FIFO with completion handles and drain |
//! | `health` | Heartbeat probes and unhealthy detection |
//! | `dedup` | Windowed duplicate suppression |

// ============================================================================
// Submodules
// ============================================================================

pub mod circuit;
pub mod dedup;
pub mod health;
pub mod queue;
pub mod retry;

// ============================================================================
// Re-exports
// ============================================================================

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitState};
pub use dedup::{DedupConfig, Deduplicator};
pub use health::{HealthConfig, HealthMonitor, HealthObserver, HeartbeatRecord, UnhealthyReason};
pub use queue::{Completion, DrainReport, OutboundQueue, QueuedOperation};
pub use retry::{RetryAttempt, RetryPolicy, RetryScheduler};
