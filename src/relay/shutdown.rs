//! Shutdown coordination.
//!
//! Each connection owns one [`ShutdownCoordinator`]. Both relays report
//! their exit to it; the first report moves the connection from `Open` to
//! `Closing` and records the [`CloseCause`], and the report that completes
//! the pair moves it to `Closed` and receives the [`CloseSequence`].
//!
//! # State Machine
//!
//! ```text
//!   Open ──first request_close──► Closing ──both relays exited──► Closed
//! ```
//!
//! The close sequence (close frame, transport close, writer release) is
//! handed out at most once, whatever the interleaving of the two reports.
//! Each of its writes is bounded by the close timeout, so a peer that
//! stopped reading cannot hold the connection in `Closing`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::DEFAULT_CLOSE_TIMEOUT_MS;
use crate::error::Error;
use crate::frame::Frame;
use crate::identifiers::ConnectionId;
use crate::transport::FrameWrite;

// ============================================================================
// ShutdownState
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownState {
    /// Both relays running.
    Open,
    /// Termination observed; relays are winding down.
    Closing,
    /// Both relays exited and teardown has been handed out.
    Closed,
}

// ============================================================================
// CloseCause
// ============================================================================

/// Why a relay, and therefore its connection, terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// Peer sent a control frame.
    PeerClosed,
    /// Peer went away without a close frame.
    PeerEof,
    /// The stream boundary was dropped by the application.
    StreamEnded,
    /// Application requested the close.
    LocalClose,
    /// The other relay or the supervisor ended the connection.
    Cancelled,
    /// Frame-level protocol violation.
    Protocol(String),
    /// Transport I/O failure.
    Io(String),
    /// A relay task panicked or was aborted.
    Aborted,
}

impl CloseCause {
    /// Classifies an error raised by a transport read or write.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        if err.is_end_of_stream() {
            Self::PeerEof
        } else if err.is_frame_error() {
            Self::Protocol(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }

    /// Returns `true` for failures, `false` for normal terminations.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Io(_) | Self::Aborted)
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::PeerEof => f.write_str("peer eof"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::LocalClose => f.write_str("local close"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Io(msg) => write!(f, "io error: {msg}"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

// ============================================================================
// RelaySide
// ============================================================================

/// One of the two relays of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaySide {
    /// Network to stream.
    Inbound,
    /// Stream to network.
    Outbound,
}

impl RelaySide {
    const fn bit(self) -> u8 {
        match self {
            Self::Inbound => 0b01,
            Self::Outbound => 0b10,
        }
    }
}

impl fmt::Display for RelaySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

const BOTH_EXITED: u8 = 0b11;

// ============================================================================
// ShutdownCoordinator
// ============================================================================

/// Drives the once-only teardown of a connection.
pub struct ShutdownCoordinator {
    id: ConnectionId,
    state: watch::Sender<ShutdownState>,
    cause: Mutex<Option<CloseCause>>,
    exited: AtomicU8,
    writer: Mutex<Option<Box<dyn FrameWrite>>>,
    close_code: u16,
    close_reason: String,
    close_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Creates a coordinator in the `Open` state.
    ///
    /// # Arguments
    ///
    /// * `id` - Connection the coordinator belongs to
    /// * `close_code` - Status code of the close frame
    /// * `close_reason` - Reason of the close frame
    pub fn new(id: ConnectionId, close_code: u16, close_reason: impl Into<String>) -> Self {
        Self {
            id,
            state: watch::Sender::new(ShutdownState::Open),
            cause: Mutex::new(None),
            exited: AtomicU8::new(0),
            writer: Mutex::new(None),
            close_code,
            close_reason: close_reason.into(),
            close_timeout: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
        }
    }

    /// Sets the bound on each write of the close sequence.
    #[must_use]
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Returns the first recorded cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<CloseCause> {
        self.cause.lock().clone()
    }

    /// Returns a signal that observes state changes.
    #[must_use]
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.state.subscribe(),
        }
    }

    /// Moves `Open` to `Closing`, recording `cause`.
    ///
    /// Returns `true` if this call performed the transition. Later calls
    /// leave the state and the recorded cause untouched.
    pub fn request_close(&self, cause: CloseCause) -> bool {
        let transitioned = self.state.send_if_modified(|state| {
            if *state != ShutdownState::Open {
                return false;
            }
            *state = ShutdownState::Closing;
            // recorded under the state lock so no reader sees Closing without a cause
            *self.cause.lock() = Some(cause);
            true
        });

        if transitioned {
            debug!(conn = %self.id, cause = ?self.cause(), "Connection closing");
        }

        transitioned
    }

    /// Reports that one relay has exited.
    ///
    /// The outbound relay passes its writer so the close sequence can use
    /// it. Returns the close sequence to the call that completes the pair;
    /// every other call, including a repeated report from the same side,
    /// gets `None`.
    pub fn report_exit(
        &self,
        side: RelaySide,
        cause: CloseCause,
        writer: Option<Box<dyn FrameWrite>>,
    ) -> Option<CloseSequence> {
        if let Some(writer) = writer {
            *self.writer.lock() = Some(writer);
        }

        self.request_close(cause);

        let bit = side.bit();
        let prev = self.exited.fetch_or(bit, Ordering::AcqRel);

        if prev & bit != 0 || prev | bit != BOTH_EXITED {
            return None;
        }

        self.state.send_replace(ShutdownState::Closed);

        Some(CloseSequence {
            id: self.id,
            writer: self.writer.lock().take(),
            close_code: self.close_code,
            close_reason: self.close_reason.clone(),
            close_timeout: self.close_timeout,
        })
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("cause", &self.cause())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// CloseSequence
// ============================================================================

/// The teardown of a connection, handed out exactly once.
#[must_use = "the close sequence does nothing unless run"]
pub struct CloseSequence {
    id: ConnectionId,
    writer: Option<Box<dyn FrameWrite>>,
    close_code: u16,
    close_reason: String,
    close_timeout: Duration,
}

impl CloseSequence {
    /// Sends the close frame, closes the transport and drops the writer.
    ///
    /// Failures are logged; teardown always completes.
    pub async fn run(self) {
        let Some(mut writer) = self.writer else {
            debug!(conn = %self.id, "No writer left for close sequence");
            return;
        };

        let frame = Frame::close(self.close_code, &self.close_reason);
        let sent = timeout(
            self.close_timeout,
            writer.write_frame(frame.header, &frame.payload),
        )
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn = %self.id, error = %e, "Close frame not sent"),
            Err(_) => warn!(conn = %self.id, "Close frame timed out"),
        }

        match timeout(self.close_timeout, writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn = %self.id, error = %e, "Transport close failed"),
            Err(_) => warn!(conn = %self.id, "Transport close timed out"),
        }

        drop(writer);

        debug!(conn = %self.id, "Close sequence complete");
    }
}

// ============================================================================
// ShutdownSignal
// ============================================================================

/// Receiver side of the coordinator's state.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<ShutdownState>,
}

impl ShutdownSignal {
    /// Resolves once the connection has left `Open`.
    pub async fn closing(&mut self) {
        self.wait_for(|state| state != ShutdownState::Open).await;
    }

    /// Resolves once the connection is `Closed`.
    pub async fn closed(&mut self) {
        self.wait_for(|state| state == ShutdownState::Closed).await;
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ShutdownState {
        *self.rx.borrow()
    }

    async fn wait_for(&mut self, done: impl Fn(ShutdownState) -> bool) {
        loop {
            if done(*self.rx.borrow_and_update()) {
                return;
            }
            // coordinator dropped: nothing left to wait for
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
