//! Error types for the relay.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wsrelay::{Result, Session};
//!
//! async fn greet(session: &Session) -> Result<()> {
//!     session.send(b"hello").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidAddress`], [`Error::ListenerExists`] |
//! | Handshake | [`Error::Handshake`], [`Error::HandshakeTimeout`] |
//! | Frame | [`Error::PayloadTooLarge`], [`Error::UnexpectedMask`], [`Error::MalformedFrame`], [`Error::InvalidUtf8`] |
//! | Connection | [`Error::ConnectionClosed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};
use std::net::SocketAddr;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::error::{CapacityError, ProtocolError};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Errors never cross connection boundaries: every error raised inside a
/// relay ends that relay and is resolved by the connection's teardown.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when relay options fail validation.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Listen address could not be parsed.
    #[error("Invalid listen address: {address}")]
    InvalidAddress {
        /// The address as given by the caller.
        address: String,
    },

    /// A listener is already registered for the address.
    #[error("Listener already registered for {addr}")]
    ListenerExists {
        /// The contested address.
        addr: SocketAddr,
    },

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Protocol upgrade failed.
    ///
    /// The raw connection is discarded and no relay is started.
    #[error("Handshake failed: {message}")]
    Handshake {
        /// Description of the handshake failure.
        message: String,
    },

    /// Protocol upgrade did not finish in time.
    #[error("Handshake timeout after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Frame Errors
    // ========================================================================
    /// Frame payload exceeds the configured ceiling.
    #[error("Payload of {length} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge {
        /// Declared payload length.
        length: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Frame masking state does not match the connection direction.
    #[error("Unexpected masking state: expected masked={expected}")]
    UnexpectedMask {
        /// Whether a masked frame was expected.
        expected: bool,
    },

    /// Frame header is inconsistent or cannot be written.
    #[error("Malformed frame: {message}")]
    MalformedFrame {
        /// Description of the problem.
        message: String,
    },

    /// Text frame payload is not UTF-8.
    #[error("Text payload is not valid UTF-8")]
    InvalidUtf8,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection or stream closed.
    ///
    /// Returned by reads at end of stream and by sends after teardown.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid address error.
    #[inline]
    pub fn invalid_address(address: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
        }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(timeout_ms: u64) -> Self {
        Self::HandshakeTimeout { timeout_ms }
    }

    /// Creates a payload too large error.
    #[inline]
    pub fn payload_too_large(length: u64, max: u64) -> Self {
        Self::PayloadTooLarge { length, max }
    }

    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Converts a tungstenite error, lifting capacity violations into
    /// [`Error::PayloadTooLarge`].
    pub fn from_websocket(err: WsError) -> Self {
        match err {
            WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
                Self::payload_too_large(size as u64, max_size as u64)
            }
            other => Self::WebSocket(other),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a frame-level protocol error.
    #[inline]
    #[must_use]
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Self::PayloadTooLarge { .. }
                | Self::UnexpectedMask { .. }
                | Self::MalformedFrame { .. }
                | Self::InvalidUtf8
                | Self::WebSocket(WsError::Protocol(_) | WsError::Capacity(_))
        ) && !self.is_end_of_stream()
    }

    /// Returns `true` if the peer simply went away.
    ///
    /// End of stream is a normal termination cause, not an escalated error.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::WebSocket(WsError::ConnectionClosed | WsError::AlreadyClosed) => true,
            Self::WebSocket(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)) => true,
            Self::WebSocket(WsError::Io(e)) | Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Returns `true` if this is a configuration error.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::InvalidAddress { .. } | Self::ListenerExists { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
