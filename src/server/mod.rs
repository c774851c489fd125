//! Listening side: supervisor, builder, registry and handlers.
//!
//! # Connection Lifecycle
//!
//! 1. `SupervisorBuilder::start` - Validate, claim the address, bind
//! 2. Accept loop - One task per accepted socket
//! 3. Handshake - Upgrade under a timeout; failures drop the socket
//! 4. `Connection::spawn` - Inbound and outbound relays start
//! 5. `StreamHandler::handle` - Application consumes the `Session`
//! 6. `Connection::join` - Teardown ran; connection leaves the active map
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Supervisor configuration and start |
//! | `handler` | `StreamHandler`, `Echo`, `handler_fn` |
//! | `registry` | Listener registry and address parsing |
//! | `supervisor` | Accept loop and per-connection lifecycle |

// ============================================================================
// Submodules
// ============================================================================

/// Supervisor builder.
pub mod builder;

/// Application handlers.
pub mod handler;

/// Listener registry.
pub mod registry;

/// Accept loop and connection lifecycle.
pub mod supervisor;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::SupervisorBuilder;
pub use handler::{Echo, HandlerFn, StreamHandler, handler_fn};
pub use registry::{ListenerRegistry, resolve_listen_addr};
pub use supervisor::Supervisor;
