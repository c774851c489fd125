//! Relay configuration.
//!
//! [`RelayOptions`] is the configuration surface shared by every connection
//! a supervisor accepts: payload ceiling, buffer pool sizing, stream
//! channel capacity, outbound frame kind and the close frame sent on
//! teardown.
//!
//! # Example
//!
//! ```ignore
//! use wsrelay::RelayOptions;
//!
//! let options = RelayOptions::new()
//!     .with_max_payload_size(1 << 20)
//!     .with_outbound_kind(FrameKind::Binary)
//!     .with_close_reason("server going away");
//!
//! options.validate()?;
//! ```
//!
//! Options may also be loaded from JSON; missing fields take their defaults:
//!
//! ```ignore
//! let options = RelayOptions::from_json(r#"{ "max_payload_size": 65536 }"#)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::{MAX_CLOSE_REASON_LEN, OpCode};

// ============================================================================
// Constants
// ============================================================================

/// Default payload ceiling: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 << 20;

/// Default minimum capacity of a pooled buffer.
pub const DEFAULT_BUFFER_MIN_SIZE: usize = 400;

/// Default number of idle buffers kept by the pool.
pub const DEFAULT_POOL_MAX_IDLE: usize = 256;

/// Default capacity above which a buffer is freed instead of pooled.
pub const DEFAULT_POOL_MAX_RETAINED: usize = 64 << 10;

/// Default stream channel capacity, in chunks.
pub const DEFAULT_STREAM_CAPACITY: usize = 8;

/// Normal closure.
pub const DEFAULT_CLOSE_CODE: u16 = 1000;

/// Reason sent with the close frame.
pub const DEFAULT_CLOSE_REASON: &str = "connection closing";

/// Default handshake timeout in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Default bound on flushing and closing a connection, in milliseconds.
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// FrameKind
// ============================================================================

/// Opcode used for outbound data frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Text frames (payload must be UTF-8).
    #[default]
    Text,
    /// Binary frames.
    Binary,
}

impl FrameKind {
    /// Returns the matching opcode.
    #[inline]
    #[must_use]
    pub const fn opcode(self) -> OpCode {
        match self {
            Self::Text => OpCode::Text,
            Self::Binary => OpCode::Binary,
        }
    }
}

// ============================================================================
// RelayOptions
// ============================================================================

/// Per-connection relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayOptions {
    /// Largest accepted inbound payload, in bytes.
    pub max_payload_size: usize,

    /// Minimum capacity of a freshly allocated pooled buffer.
    pub buffer_min_size: usize,

    /// Idle buffers retained by the pool.
    pub pool_max_idle: usize,

    /// Buffers that grew beyond this capacity are freed on release.
    pub pool_max_retained: usize,

    /// Capacity of each stream channel, in chunks.
    pub stream_capacity: usize,

    /// Opcode of outbound data frames.
    pub outbound_kind: FrameKind,

    /// Status code of the close frame sent on teardown.
    pub close_code: u16,

    /// Reason of the close frame sent on teardown.
    pub close_reason: String,

    /// Upper bound on the protocol upgrade, in milliseconds.
    pub handshake_timeout_ms: u64,

    /// Upper bound on each teardown write phase (flushing queued chunks,
    /// then the close frame and transport close), in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl RelayOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            buffer_min_size: DEFAULT_BUFFER_MIN_SIZE,
            pool_max_idle: DEFAULT_POOL_MAX_IDLE,
            pool_max_retained: DEFAULT_POOL_MAX_RETAINED,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            outbound_kind: FrameKind::Text,
            close_code: DEFAULT_CLOSE_CODE,
            close_reason: DEFAULT_CLOSE_REASON.to_string(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
        }
    }

    /// Parses options from JSON and validates them.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document is not valid JSON for these options
    /// - [`Error::Config`] if validation fails
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl RelayOptions {
    /// Sets the payload ceiling.
    #[inline]
    #[must_use]
    pub fn with_max_payload_size(mut self, bytes: usize) -> Self {
        self.max_payload_size = bytes;
        self
    }

    /// Sets the minimum pooled buffer capacity.
    #[inline]
    #[must_use]
    pub fn with_buffer_min_size(mut self, bytes: usize) -> Self {
        self.buffer_min_size = bytes;
        self
    }

    /// Sets pool retention limits.
    #[inline]
    #[must_use]
    pub fn with_pool_limits(mut self, max_idle: usize, max_retained: usize) -> Self {
        self.pool_max_idle = max_idle;
        self.pool_max_retained = max_retained;
        self
    }

    /// Sets the stream channel capacity.
    #[inline]
    #[must_use]
    pub fn with_stream_capacity(mut self, chunks: usize) -> Self {
        self.stream_capacity = chunks;
        self
    }

    /// Sets the outbound frame kind.
    #[inline]
    #[must_use]
    pub fn with_outbound_kind(mut self, kind: FrameKind) -> Self {
        self.outbound_kind = kind;
        self
    }

    /// Sets the close status code.
    #[inline]
    #[must_use]
    pub fn with_close_code(mut self, code: u16) -> Self {
        self.close_code = code;
        self
    }

    /// Sets the close reason.
    #[inline]
    #[must_use]
    pub fn with_close_reason(mut self, reason: impl Into<String>) -> Self {
        self.close_reason = reason.into();
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the teardown timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

// ============================================================================
// Accessors & Validation
// ============================================================================

impl RelayOptions {
    /// Returns the handshake timeout.
    #[inline]
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Returns the teardown timeout.
    #[inline]
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size == 0 {
            return Err(Error::config("max_payload_size must be greater than zero"));
        }

        if self.buffer_min_size == 0 {
            return Err(Error::config("buffer_min_size must be greater than zero"));
        }

        if self.pool_max_retained < self.buffer_min_size {
            return Err(Error::config(
                "pool_max_retained must be at least buffer_min_size",
            ));
        }

        // tokio's bounded channel rejects a zero capacity
        if self.stream_capacity == 0 {
            return Err(Error::config("stream_capacity must be greater than zero"));
        }

        if !is_sendable_close_code(self.close_code) {
            return Err(Error::config(format!(
                "close_code {} cannot be sent in a close frame",
                self.close_code
            )));
        }

        if self.close_reason.len() > MAX_CLOSE_REASON_LEN {
            return Err(Error::config(format!(
                "close_reason must be at most {MAX_CLOSE_REASON_LEN} bytes"
            )));
        }

        if self.handshake_timeout_ms == 0 {
            return Err(Error::config("handshake_timeout_ms must be greater than zero"));
        }

        if self.close_timeout_ms == 0 {
            return Err(Error::config("close_timeout_ms must be greater than zero"));
        }

        Ok(())
    }
}

/// Status codes an endpoint may put on the wire (RFC 6455 section 7.4).
const fn is_sendable_close_code(code: u16) -> bool {
    match code {
        1004 | 1005 | 1006 | 1015 => false,
        1000..=4999 => true,
        _ => false,
    }
}

// ============================================================================
// Tests
// ============================================================================
