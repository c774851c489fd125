//! Frame transport boundary.
//!
//! The relays never touch sockets directly. They read and write decoded
//! frames through the object-safe traits defined here, and the supervisor
//! obtains a pair of halves from a [`Handshake`] once the protocol upgrade
//! succeeds.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  handshake   ┌──────────────────────────────┐
//! │  TcpStream   │─────────────►│ Box<dyn FrameRead>  (inbound)│
//! │  (accepted)  │              │ Box<dyn FrameWrite> (outbound)│
//! └──────────────┘              └──────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | tokio-tungstenite implementation of the traits |

// ============================================================================
// Submodules
// ============================================================================

/// tokio-tungstenite transport.
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::Result;
use crate::frame::FrameHeader;

// ============================================================================
// Re-exports
// ============================================================================

pub use websocket::{WebSocketHandshake, WsReader, WsWriter};

// ============================================================================
// Traits
// ============================================================================

/// Read half of a frame transport.
#[async_trait]
pub trait FrameRead: Send {
    /// Reads the next frame.
    ///
    /// The payload is written into `payload`, which the caller passes in
    /// empty. The returned header describes it; when
    /// [`FrameHeader::mask`] is set the bytes are still masked.
    ///
    /// # Errors
    ///
    /// End of stream is reported as an error for which
    /// [`Error::is_end_of_stream`](crate::Error::is_end_of_stream) holds.
    async fn read_frame(&mut self, payload: &mut Vec<u8>) -> Result<FrameHeader>;

    /// Whether frames from this peer must arrive masked.
    fn expects_masked(&self) -> bool;
}

/// Write half of a frame transport.
#[async_trait]
pub trait FrameWrite: Send {
    /// Writes one frame with the given header and payload.
    async fn write_frame(&mut self, header: FrameHeader, payload: &[u8]) -> Result<()>;

    /// Closes the underlying transport.
    async fn close(&mut self) -> Result<()>;
}

/// Protocol upgrade of an accepted socket.
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Upgrades `stream` and splits it into independent halves.
    async fn handshake(&self, stream: TcpStream)
    -> Result<(Box<dyn FrameRead>, Box<dyn FrameWrite>)>;
}
