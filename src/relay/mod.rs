//! Per-connection relay engine.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `inbound` | Network-to-stream relay |
//! | `outbound` | Stream-to-network relay |
//! | `shutdown` | Once-only teardown coordination |
//! | `connection` | Spawns and joins a relay pair |
//! | `session` | Stream boundary handed to application code |

// ============================================================================
// Submodules
// ============================================================================

/// Relay pair lifecycle.
pub mod connection;

/// Network-to-stream relay.
pub mod inbound;

/// Stream-to-network relay.
pub mod outbound;

/// Stream boundary.
pub mod session;

/// Shutdown coordination.
pub mod shutdown;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionSummary};
pub use inbound::InboundRelay;
pub use outbound::OutboundRelay;
pub use session::{CloseHandle, Session, StreamReader, StreamWriter};
pub use shutdown::{
    CloseCause, CloseSequence, RelaySide, ShutdownCoordinator, ShutdownSignal, ShutdownState,
};
