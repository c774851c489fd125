//! Stream boundary handed to application code.
//!
//! A [`Session`] is the byte-chunk view of one connection: chunks the
//! inbound relay forwarded are pulled with [`Session::recv`], chunks pushed
//! with [`Session::send`] are framed by the outbound relay.
//!
//! The session can be split with [`Session::into_parts`] so the reader of
//! one connection feeds the writer of another.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::relay::shutdown::{CloseCause, ShutdownCoordinator, ShutdownState};

// ============================================================================
// Session
// ============================================================================

/// Application side of one connection.
///
/// Only data frames become chunks. Any control frame from the peer (Close,
/// Ping or Pong) ends the inbound side, so a client that sends keepalive
/// pings gets its connection closed on the first one.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    peer_addr: SocketAddr,
    reader: StreamReader,
    writer: StreamWriter,
    handle: CloseHandle,
}

impl Session {
    pub(crate) fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        reader: StreamReader,
        writer: StreamWriter,
        handle: CloseHandle,
    ) -> Self {
        Self {
            id,
            peer_addr,
            reader,
            writer,
            handle,
        }
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the peer's address.
    #[inline]
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Receives the next inbound chunk.
    ///
    /// Returns `None` once the inbound relay has stopped and every chunk it
    /// forwarded has been received.
    pub async fn recv(&mut self) -> Option<PooledBuffer> {
        self.reader.recv().await
    }

    /// Queues `bytes` as one outbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the outbound relay has stopped.
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.writer.send(bytes).await
    }

    /// Queues a pooled chunk as one outbound frame without copying.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the outbound relay has stopped.
    pub async fn send_chunk(&self, chunk: PooledBuffer) -> Result<()> {
        self.writer.send_chunk(chunk).await
    }

    /// Requests a local close.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Returns the connection's shutdown state.
    #[must_use]
    pub fn state(&self) -> ShutdownState {
        self.handle.state()
    }

    /// Waits until teardown has been handed out.
    pub async fn closed(&self) {
        self.handle.closed().await;
    }

    /// Splits the session into its reader, writer and close handle.
    #[must_use]
    pub fn into_parts(self) -> (StreamReader, StreamWriter, CloseHandle) {
        (self.reader, self.writer, self.handle)
    }
}

// ============================================================================
// StreamReader
// ============================================================================

/// Receiving end of the inbound stream.
///
/// Dropping it makes the inbound relay stop at its next forward.
#[derive(Debug)]
pub struct StreamReader {
    rx: mpsc::Receiver<PooledBuffer>,
}

impl StreamReader {
    pub(crate) fn new(rx: mpsc::Receiver<PooledBuffer>) -> Self {
        Self { rx }
    }

    /// Receives the next chunk, or `None` at end of stream.
    pub async fn recv(&mut self) -> Option<PooledBuffer> {
        self.rx.recv().await
    }
}

// ============================================================================
// StreamWriter
// ============================================================================

/// Sending end of the outbound stream.
///
/// Clones share the channel; the outbound relay sees end of stream once
/// every clone is dropped.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    tx: mpsc::Sender<PooledBuffer>,
    pool: BufferPool,
}

impl StreamWriter {
    pub(crate) fn new(tx: mpsc::Sender<PooledBuffer>, pool: BufferPool) -> Self {
        Self { tx, pool }
    }

    /// Copies `bytes` into a pooled buffer and queues it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the outbound relay has stopped.
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut chunk = self.pool.acquire();
        chunk.extend_from_slice(bytes);
        self.send_chunk(chunk).await
    }

    /// Queues a chunk. Waits while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the outbound relay has stopped.
    pub async fn send_chunk(&self, chunk: PooledBuffer) -> Result<()> {
        self.tx.send(chunk).await.map_err(|_| Error::ConnectionClosed)
    }

    /// Returns `true` once the outbound relay has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// CloseHandle
// ============================================================================

/// Requests and observes the close of a connection.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    coord: Arc<ShutdownCoordinator>,
}

impl CloseHandle {
    pub(crate) fn new(coord: Arc<ShutdownCoordinator>) -> Self {
        Self { coord }
    }

    /// Requests a local close. Has no effect once the connection is closing.
    pub fn close(&self) {
        self.coord.request_close(CloseCause::LocalClose);
    }

    /// Requests a close with an explicit cause.
    pub(crate) fn close_with(&self, cause: CloseCause) {
        self.coord.request_close(cause);
    }

    /// Returns the shutdown state.
    #[must_use]
    pub fn state(&self) -> ShutdownState {
        self.coord.state()
    }

    /// Waits until the connection is `Closed`.
    pub async fn closed(&self) {
        self.coord.subscribe().closed().await;
    }
}

// ============================================================================
// Tests
// ============================================================================
