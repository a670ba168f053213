//! Orchestration of the chat and notification sessions.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`OrchestratorBuilder`] with endpoint validation |
//! | `core` | [`ConnectionOrchestrator`] lifecycle, credential watch and handlers |
//! | `status` | [`InitOptions`], [`OrchestratorStatus`] and state aggregation |

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for orchestrator configuration.
pub mod builder;

/// Orchestrator handle.
pub mod core;

/// Aggregated status.
pub mod status;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::OrchestratorBuilder;
pub use core::{ConnectivityHandler, ConnectionOrchestrator, SessionErrorHandler};
pub use status::{InitOptions, OrchestratorStatus, aggregate};
