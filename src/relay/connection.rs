//! Per-connection relay pair.
//!
//! [`Connection::spawn`] starts the inbound and outbound relays of one
//! upgraded connection as independent tasks sharing a
//! [`ShutdownCoordinator`], and returns the [`Session`] the application
//! uses to exchange chunks with them.
//!
//! # Task Layout
//!
//! ```text
//!            ┌──────────────────┐  chunks   ┌─────────────┐
//!  peer ────►│  InboundRelay    │──────────►│             │
//!            └──────────────────┘           │   Session   │
//!            ┌──────────────────┐  chunks   │ (handler)   │
//!  peer ◄────│  OutboundRelay   │◄──────────│             │
//!            └──────────────────┘           └─────────────┘
//!                 both report to ShutdownCoordinator
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::buffer::BufferPool;
use crate::config::RelayOptions;
use crate::identifiers::ConnectionId;
use crate::relay::inbound::InboundRelay;
use crate::relay::outbound::OutboundRelay;
use crate::relay::session::{CloseHandle, Session, StreamReader, StreamWriter};
use crate::relay::shutdown::{CloseCause, RelaySide, ShutdownCoordinator};
use crate::transport::{FrameRead, FrameWrite};

// ============================================================================
// ConnectionSummary
// ============================================================================

/// Outcome of a finished connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Connection ID.
    pub id: ConnectionId,
    /// Peer address.
    pub peer_addr: SocketAddr,
    /// First recorded termination cause.
    pub cause: CloseCause,
}

// ============================================================================
// Connection
// ============================================================================

/// Running relay pair of one connection.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    coord: Arc<ShutdownCoordinator>,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl Connection {
    /// Spawns both relays over the given transport halves.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        id: ConnectionId,
        peer_addr: SocketAddr,
        reader: Box<dyn FrameRead>,
        writer: Box<dyn FrameWrite>,
        options: &RelayOptions,
        pool: BufferPool,
    ) -> (Self, Session) {
        let coord = Arc::new(
            ShutdownCoordinator::new(id, options.close_code, options.close_reason.clone())
                .with_close_timeout(options.close_timeout()),
        );

        let (in_tx, in_rx) = mpsc::channel(options.stream_capacity);
        let (out_tx, out_rx) = mpsc::channel(options.stream_capacity);

        let inbound_relay = InboundRelay::new(
            id,
            options.max_payload_size,
            pool.clone(),
            in_tx,
            coord.subscribe(),
        );
        let outbound_relay = OutboundRelay::new(id, options.outbound_kind, out_rx, coord.subscribe())
            .with_close_timeout(options.close_timeout());

        let inbound = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move {
                let cause = inbound_relay.run(reader).await;
                debug!(conn = %id, side = %RelaySide::Inbound, cause = %cause, "Relay exited");

                if let Some(sequence) = coord.report_exit(RelaySide::Inbound, cause, None) {
                    sequence.run().await;
                }
            })
        };

        let outbound = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move {
                let (cause, writer) = outbound_relay.run(writer).await;
                debug!(conn = %id, side = %RelaySide::Outbound, cause = %cause, "Relay exited");

                if let Some(sequence) = coord.report_exit(RelaySide::Outbound, cause, Some(writer)) {
                    sequence.run().await;
                }
            })
        };

        let session = Session::new(
            id,
            peer_addr,
            StreamReader::new(in_rx),
            StreamWriter::new(out_tx, pool),
            CloseHandle::new(Arc::clone(&coord)),
        );

        let connection = Self {
            id,
            peer_addr,
            coord,
            inbound,
            outbound,
        };

        (connection, session)
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns a handle that can close this connection.
    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle::new(Arc::clone(&self.coord))
    }

    /// Waits for both relays and the close sequence to finish.
    ///
    /// A relay task that panicked is reported as [`CloseCause::Aborted`], so
    /// teardown still runs.
    pub async fn join(self) -> ConnectionSummary {
        let sides = [
            (RelaySide::Inbound, self.inbound),
            (RelaySide::Outbound, self.outbound),
        ];

        for (side, handle) in sides {
            if let Err(e) = handle.await {
                warn!(conn = %self.id, side = %side, error = %e, "Relay task aborted");

                if let Some(sequence) = self.coord.report_exit(side, CloseCause::Aborted, None) {
                    sequence.run().await;
                }
            }
        }

        ConnectionSummary {
            id: self.id,
            peer_addr: self.peer_addr,
            cause: self.coord.cause().unwrap_or(CloseCause::Cancelled),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::frame::{Frame, FrameHeader, OpCode, decode_close_payload};
    use crate::relay::shutdown::ShutdownState;
    use crate::transport::mock::{MockReader, MockWriter, PeerInput};

    fn spawn_with(
        options: &RelayOptions,
        expects_masked: bool,
    ) -> (
        Connection,
        Session,
        mpsc::UnboundedSender<PeerInput>,
        MockWriter,
    ) {
        let (reader, peer) = MockReader::new(expects_masked);
        let writer = MockWriter::new();
        let pool = BufferPool::for_bytes(16, 8, 4096);

        let (connection, session) = Connection::spawn(
            ConnectionId::next(),
            "127.0.0.1:4000".parse().unwrap(),
            Box::new(reader),
            Box::new(writer.clone()),
            options,
            pool,
        );
        (connection, session, peer, writer)
    }

    fn close_frames(writer: &MockWriter) -> Vec<Frame> {
        writer
            .frames()
            .into_iter()
            .filter(|f| f.header.opcode == OpCode::Close)
            .collect()
    }

    #[tokio::test]
    async fn test_ping_pong_exchange() {
        let (connection, mut session, peer, writer) = spawn_with(&RelayOptions::new(), true);

        peer.send(Ok(Frame::new(OpCode::Text, "ping").masked([0xa, 0xb, 0xc, 0xd])))
            .unwrap();

        let chunk = session.recv().await.expect("inbound chunk");
        assert_eq!(&chunk[..], b"ping");
        drop(chunk);

        session.send(b"pong").await.unwrap();
        // dropping the session flushes queued chunks before teardown
        drop(session);
        let summary = connection.join().await;

        assert_eq!(summary.cause, CloseCause::StreamEnded);

        let frames = writer.frames();
        assert_eq!(frames[0].header, FrameHeader::new(OpCode::Text, true, None, 4));
        assert_eq!(frames[0].payload, b"pong");
        assert_eq!(close_frames(&writer).len(), 1);
        assert_eq!(writer.closes(), 1);
    }

    #[tokio::test]
    async fn test_peer_close_tears_down_once() {
        let (connection, session, peer, writer) = spawn_with(&RelayOptions::new(), true);

        peer.send(Ok(Frame::close(1000, "bye").masked([1, 2, 3, 4])))
            .unwrap();

        let summary = connection.join().await;
        assert_eq!(summary.cause, CloseCause::PeerClosed);
        assert!(!summary.cause.is_error());
        assert_eq!(session.state(), ShutdownState::Closed);

        let closes = close_frames(&writer);
        assert_eq!(closes.len(), 1);
        assert_eq!(
            decode_close_payload(&closes[0].payload),
            Some((1000, "connection closing".to_string()))
        );
        assert_eq!(writer.closes(), 1);
    }

    #[tokio::test]
    async fn test_oversize_frame_closes_without_forwarding() {
        let options = RelayOptions::new().with_max_payload_size(8);
        let (connection, mut session, peer, writer) = spawn_with(&options, true);

        peer.send(Ok(Frame::new(OpCode::Binary, vec![0u8; 9]).masked([1, 2, 3, 4])))
            .unwrap();

        let summary = connection.join().await;
        assert!(matches!(summary.cause, CloseCause::Protocol(_)));
        assert!(session.recv().await.is_none());

        // only the close frame reaches the wire
        assert_eq!(writer.frames().len(), 1);
        assert_eq!(close_frames(&writer).len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_session_ends_connection() {
        let (connection, session, _peer, writer) = spawn_with(&RelayOptions::new(), true);

        drop(session);
        let summary = connection.join().await;

        assert_eq!(summary.cause, CloseCause::StreamEnded);
        assert_eq!(writer.closes(), 1);
    }

    #[tokio::test]
    async fn test_close_handle_from_connection() {
        let (connection, session, _peer, writer) = spawn_with(&RelayOptions::new(), true);

        connection.close_handle().close();
        session.closed().await;

        connection.join().await;
        assert_eq!(close_frames(&writer).len(), 1);
    }

    #[tokio::test]
    async fn test_local_close_sends_queued_chunk_first() {
        let (connection, session, _peer, writer) = spawn_with(&RelayOptions::new(), true);

        session.send(b"bye").await.unwrap();
        session.close();
        let summary = connection.join().await;
        assert_eq!(summary.cause, CloseCause::LocalClose);

        let frames = writer.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].header.opcode, OpCode::Text);
        assert_eq!(frames[0].payload, b"bye");
        assert_eq!(frames[1].header.opcode, OpCode::Close);
        assert_eq!(writer.closes(), 1);
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_block_teardown() {
        let (reader, _peer) = MockReader::new(true);
        let writer = MockWriter::stalled();
        let options = RelayOptions::new().with_close_timeout(Duration::from_millis(50));

        let (connection, session) = Connection::spawn(
            ConnectionId::next(),
            "127.0.0.1:4001".parse().unwrap(),
            Box::new(reader),
            Box::new(writer.clone()),
            &options,
            BufferPool::for_bytes(16, 8, 4096),
        );

        session.send(b"never read").await.unwrap();
        connection.close_handle().close_with(CloseCause::Cancelled);

        let summary = tokio::time::timeout(Duration::from_secs(2), connection.join())
            .await
            .expect("teardown bounded by close timeout");
        assert_eq!(summary.cause, CloseCause::Cancelled);
        assert_eq!(session.state(), ShutdownState::Closed);
        assert!(writer.frames().is_empty());
        assert_eq!(writer.closes(), 1);
    }

    #[tokio::test]
    async fn test_custom_close_frame() {
        let options = RelayOptions::new()
            .with_close_code(4001)
            .with_close_reason("maintenance");
        let (connection, _session, peer, writer) = spawn_with(&options, true);

        drop(peer);
        let summary = connection.join().await;
        assert_eq!(summary.cause, CloseCause::PeerEof);

        let closes = close_frames(&writer);
        assert_eq!(
            decode_close_payload(&closes[0].payload),
            Some((4001, "maintenance".to_string()))
        );
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let (connection, mut session, peer, writer) = spawn_with(&RelayOptions::new(), true);

        for i in 0..32u8 {
            peer.send(Ok(Frame::new(OpCode::Binary, vec![i; 3]).masked([i, 0, i, 0])))
                .unwrap();
        }

        for i in 0..32u8 {
            let chunk = session.recv().await.expect("chunk");
            assert_eq!(&chunk[..], &[i; 3]);
            session.send_chunk(chunk).await.unwrap();
        }

        drop(session);
        connection.join().await;

        let data: Vec<_> = writer
            .frames()
            .into_iter()
            .filter(|f| f.header.opcode != OpCode::Close)
            .collect();
        assert_eq!(data.len(), 32);
        for (i, frame) in data.iter().enumerate() {
            assert_eq!(frame.payload, vec![i as u8; 3]);
        }
    }
}
