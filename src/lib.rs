//! wsrelay - WebSocket frames in, plain byte stream out.
//!
//! This library bridges a framed, masked WebSocket connection to a plain
//! bidirectional stream of byte chunks that application code can consume
//! without knowing anything about opcodes, masking or lengths.
//!
//! # Architecture
//!
//! Every upgraded connection runs two independent tasks:
//!
//! - **Inbound relay**: reads frames, validates and unmasks them, forwards
//!   each payload as one chunk
//! - **Outbound relay**: takes chunks and writes each as one final,
//!   unmasked frame
//!
//! Both report to a per-connection shutdown coordinator, which sends the
//! close frame and closes the transport exactly once, whichever side ends
//! the connection first.
//!
//! ```text
//!   client ══frames══► InboundRelay ──chunks──► Session ──► handler
//!   client ◄═frames═══ OutboundRelay ◄─chunks── Session ◄── handler
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use wsrelay::{Error, Result, Session, Supervisor, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let supervisor = Supervisor::builder()
//!         .address("127.0.0.1:8080")
//!         .handler(handler_fn(|mut session: Session| async move {
//!             while let Some(chunk) = session.recv().await {
//!                 session.send(&chunk.to_ascii_uppercase()).await?;
//!             }
//!             Ok::<_, Error>(())
//!         }))
//!         .start()
//!         .await?;
//!
//!     println!("listening on {}", supervisor.ws_url());
//!     tokio::signal::ctrl_c().await?;
//!     supervisor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`buffer`] | Reusable buffer pool |
//! | [`config`] | [`RelayOptions`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`frame`] | Opcodes, headers, masking, close payloads |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`relay`] | Relays, shutdown coordination, [`Session`] |
//! | [`server`] | [`Supervisor`], registry, handlers |
//! | [`transport`] | Frame transport traits and WebSocket implementation |

// ============================================================================
// Modules
// ============================================================================

/// Reusable buffer pool.
pub mod buffer;

/// Relay configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Frame model.
pub mod frame;

/// Type-safe identifiers.
pub mod identifiers;

/// Per-connection relay engine.
///
/// - [`InboundRelay`] - network to stream
/// - [`OutboundRelay`] - stream to network
/// - [`ShutdownCoordinator`] - once-only teardown
pub mod relay;

/// Supervisor, listener registry and application handlers.
pub mod server;

/// Frame transport boundary.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Buffer types
pub use buffer::{BufferPool, Pool, PoolStats, Pooled, PooledBuffer, Recycle};

// Configuration
pub use config::{FrameKind, RelayOptions};

// Error types
pub use error::{Error, Result};

// Frame types
pub use frame::{Frame, FrameHeader, OpCode, unmask};

// Identifier types
pub use identifiers::ConnectionId;

// Relay types
pub use relay::{
    CloseCause, CloseHandle, Connection, ConnectionSummary, InboundRelay, OutboundRelay, Session,
    ShutdownCoordinator, ShutdownState, StreamReader, StreamWriter,
};

// Server types
pub use server::{
    Echo, ListenerRegistry, StreamHandler, Supervisor, SupervisorBuilder, handler_fn,
};

// Transport types
pub use transport::{FrameRead, FrameWrite, Handshake, WebSocketHandshake};
