//! Outbound relay: stream to network.
//!
//! Every chunk taken from the stream source becomes exactly one final,
//! unmasked frame of the configured kind.
//!
//! Once the connection starts closing the source is closed and whatever is
//! still queued is flushed, bounded by the close timeout. A write that is
//! pending when closing starts gets the same bound, after which it is
//! abandoned.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::buffer::PooledBuffer;
use crate::config::{DEFAULT_CLOSE_TIMEOUT_MS, FrameKind};
use crate::error::Error;
use crate::frame::FrameHeader;
use crate::identifiers::ConnectionId;
use crate::relay::shutdown::{CloseCause, ShutdownSignal};
use crate::transport::FrameWrite;

// ============================================================================
// OutboundRelay
// ============================================================================

/// Stream-to-network half of a connection.
pub struct OutboundRelay {
    id: ConnectionId,
    kind: FrameKind,
    source: mpsc::Receiver<PooledBuffer>,
    shutdown: ShutdownSignal,
    close_timeout: Duration,
}

impl OutboundRelay {
    /// Creates an outbound relay writing frames of `kind`.
    pub fn new(
        id: ConnectionId,
        kind: FrameKind,
        source: mpsc::Receiver<PooledBuffer>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            id,
            kind,
            source,
            shutdown,
            close_timeout: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
        }
    }

    /// Sets the bound on writes once the connection is closing.
    #[must_use]
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Runs until the stream source ends, a write fails or the connection
    /// starts closing.
    ///
    /// Returns why the relay stopped together with the writer, which the
    /// close sequence still needs.
    pub async fn run(mut self, mut writer: Box<dyn FrameWrite>) -> (CloseCause, Box<dyn FrameWrite>) {
        let cause = match self.forward(writer.as_mut()).await {
            Some(cause) => cause,
            None => self.flush(writer.as_mut()).await,
        };

        (cause, writer)
    }

    /// Writes chunks while the connection is open.
    ///
    /// Returns `None` once the connection starts closing.
    async fn forward(&mut self, writer: &mut dyn FrameWrite) -> Option<CloseCause> {
        let opcode = self.kind.opcode();
        let grace = self.close_timeout;

        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.closing() => return None,
                next = self.source.recv() => next,
            };

            let Some(chunk) = next else {
                debug!(conn = %self.id, "Stream source ended");
                return Some(CloseCause::StreamEnded);
            };

            let header = FrameHeader::unmasked(opcode, chunk.len() as u64);
            let mut write = writer.write_frame(header, &chunk);

            let written = tokio::select! {
                biased;
                result = &mut write => Some(result),
                () = self.shutdown.closing() => timeout(grace, &mut write).await.ok(),
            };

            match written {
                Some(Ok(())) => trace!(conn = %self.id, len = chunk.len(), "Frame sent"),
                Some(Err(e)) => return Some(self.write_failed(&e)),
                None => {
                    warn!(conn = %self.id, "Write stalled while closing");
                    return Some(CloseCause::Cancelled);
                }
            }
        }
    }

    /// Writes what was queued before the connection started closing.
    async fn flush(&mut self, writer: &mut dyn FrameWrite) -> CloseCause {
        // senders see a closed stream from here on
        self.source.close();

        let opcode = self.kind.opcode();
        let source = &mut self.source;

        let drain = async {
            let mut flushed = 0usize;
            while let Some(chunk) = source.recv().await {
                let header = FrameHeader::unmasked(opcode, chunk.len() as u64);
                writer.write_frame(header, &chunk).await?;
                flushed += 1;
            }
            Ok::<_, Error>(flushed)
        };

        let drained = timeout(self.close_timeout, drain).await;

        match drained {
            Ok(Ok(flushed)) => {
                if flushed > 0 {
                    debug!(conn = %self.id, flushed, "Queued chunks flushed");
                }
                CloseCause::Cancelled
            }
            Ok(Err(e)) => self.write_failed(&e),
            Err(_) => {
                warn!(conn = %self.id, "Flush timed out");
                CloseCause::Cancelled
            }
        }
    }

    fn write_failed(&self, e: &Error) -> CloseCause {
        let cause = CloseCause::from_error(e);
        if cause.is_error() {
            warn!(conn = %self.id, error = %e, "Outbound relay failed");
        } else {
            debug!(conn = %self.id, "Peer gone during write");
        }
        cause
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::buffer::BufferPool;
    use crate::frame::OpCode;
    use crate::relay::shutdown::ShutdownCoordinator;
    use crate::transport::mock::MockWriter;

    fn chunk(pool: &BufferPool, bytes: &[u8]) -> PooledBuffer {
        let mut buf = pool.acquire();
        buf.extend_from_slice(bytes);
        buf
    }

    #[tokio::test]
    async fn test_one_frame_per_chunk() {
        let pool = BufferPool::for_bytes(16, 8, 4096);
        let coord = ShutdownCoordinator::new(ConnectionId::next(), 1000, "bye");
        let (tx, rx) = mpsc::channel(4);
        let writer = MockWriter::new();

        tx.send(chunk(&pool, b"pong")).await.unwrap();
        tx.send(chunk(&pool, b"")).await.unwrap();
        drop(tx);

        let relay = OutboundRelay::new(ConnectionId::next(), FrameKind::Text, rx, coord.subscribe());
        let (cause, _writer) = relay.run(Box::new(writer.clone())).await;
        assert_eq!(cause, CloseCause::StreamEnded);

        let frames = writer.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, b"pong");
        assert_eq!(frames[0].header, FrameHeader::new(OpCode::Text, true, None, 4));
        assert_eq!(frames[1].header.length, 0);
    }

    #[tokio::test]
    async fn test_binary_kind() {
        let pool = BufferPool::for_bytes(16, 8, 4096);
        let coord = ShutdownCoordinator::new(ConnectionId::next(), 1000, "bye");
        let (tx, rx) = mpsc::channel(1);
        let writer = MockWriter::new();

        tx.send(chunk(&pool, &[0, 159, 146, 150])).await.unwrap();
        drop(tx);

        let relay =
            OutboundRelay::new(ConnectionId::next(), FrameKind::Binary, rx, coord.subscribe());
        relay.run(Box::new(writer.clone())).await;

        assert_eq!(writer.frames()[0].header.opcode, OpCode::Binary);
    }

    #[tokio::test]
    async fn test_write_error_is_terminal() {
        let pool = BufferPool::for_bytes(16, 8, 4096);
        let coord = ShutdownCoordinator::new(ConnectionId::next(), 1000, "bye");
        let (tx, rx) = mpsc::channel(4);

        tx.send(chunk(&pool, b"a")).await.unwrap();
        tx.send(chunk(&pool, b"b")).await.unwrap();

        let relay = OutboundRelay::new(ConnectionId::next(), FrameKind::Text, rx, coord.subscribe());
        let (cause, _writer) = relay.run(Box::new(MockWriter::failing())).await;

        // broken pipe counts as the peer going away
        assert_eq!(cause, CloseCause::PeerEof);
        drop(tx);
    }

    #[tokio::test]
    async fn test_closing_unblocks_idle_source() {
        let coord = ShutdownCoordinator::new(ConnectionId::next(), 1000, "bye");
        let (_tx, rx) = mpsc::channel::<PooledBuffer>(4);
        let writer = MockWriter::new();

        let relay = OutboundRelay::new(ConnectionId::next(), FrameKind::Text, rx, coord.subscribe());
        let task = tokio::spawn(relay.run(Box::new(writer.clone())));

        coord.request_close(CloseCause::PeerClosed);
        let (cause, _writer) = task.await.expect("relay task");

        assert_eq!(cause, CloseCause::Cancelled);
        assert!(writer.frames().is_empty());
    }

    #[tokio::test]
    async fn test_closing_flushes_queued_chunks() {
        let pool = BufferPool::for_bytes(16, 8, 4096);
        let coord = ShutdownCoordinator::new(ConnectionId::next(), 1000, "bye");
        let (tx, rx) = mpsc::channel(4);
        let writer = MockWriter::new();

        for bytes in [&b"one"[..], b"two", b"three"] {
            tx.send(chunk(&pool, bytes)).await.unwrap();
        }
        coord.request_close(CloseCause::LocalClose);

        let relay = OutboundRelay::new(ConnectionId::next(), FrameKind::Text, rx, coord.subscribe());
        let (cause, _writer) = relay.run(Box::new(writer.clone())).await;
        assert_eq!(cause, CloseCause::Cancelled);

        let payloads: Vec<_> = writer.frames().into_iter().map(|f| f.payload).collect();
        assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);

        // nothing is accepted once the relay has gone
        assert!(tx.try_send(chunk(&pool, b"late")).is_err());
    }

    #[tokio::test]
    async fn test_stalled_write_abandoned_after_close_timeout() {
        let pool = BufferPool::for_bytes(16, 8, 4096);
        let coord = ShutdownCoordinator::new(ConnectionId::next(), 1000, "bye");
        let (tx, rx) = mpsc::channel(4);
        let writer = MockWriter::stalled();

        tx.send(chunk(&pool, b"stuck")).await.unwrap();

        let relay = OutboundRelay::new(ConnectionId::next(), FrameKind::Text, rx, coord.subscribe())
            .with_close_timeout(Duration::from_millis(50));
        let task = tokio::spawn(relay.run(Box::new(writer.clone())));

        tokio::time::sleep(Duration::from_millis(20)).await;
        coord.request_close(CloseCause::Cancelled);

        let (cause, _writer) = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("relay bounded by close timeout")
            .expect("relay task");
        assert_eq!(cause, CloseCause::Cancelled);
        assert!(writer.frames().is_empty());
        drop(tx);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_one_unmasked_final_frame_per_chunk(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..128), 0..16),
        ) {
            let frames = tokio_test::block_on(async {
                let pool = BufferPool::for_bytes(16, 8, 4096);
                let coord = ShutdownCoordinator::new(ConnectionId::next(), 1000, "bye");
                let (tx, rx) = mpsc::channel(chunks.len().max(1));
                let writer = MockWriter::new();

                for c in &chunks {
                    tx.send(chunk(&pool, c)).await.unwrap();
                }
                drop(tx);

                let relay = OutboundRelay::new(
                    ConnectionId::next(),
                    FrameKind::Binary,
                    rx,
                    coord.subscribe(),
                );
                relay.run(Box::new(writer.clone())).await;
                writer.frames()
            });

            prop_assert_eq!(frames.len(), chunks.len());
            for (frame, chunk) in frames.iter().zip(&chunks) {
                prop_assert!(frame.header.fin);
                prop_assert!(!frame.header.is_masked());
                prop_assert_eq!(frame.header.length, chunk.len() as u64);
                prop_assert_eq!(&frame.payload, chunk);
            }
        }
    }
}
