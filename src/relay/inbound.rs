//! Inbound relay: network to stream.
//!
//! Reads frames from the transport, validates them, unmasks masked
//! payloads and forwards each payload as one chunk on the stream channel.
//! Forwarding waits while the channel is full, which is the only
//! backpressure between the network and the consumer.

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::buffer::{BufferPool, PooledBuffer};
use crate::error::{Error, Result};
use crate::frame::{FrameHeader, unmask};
use crate::identifiers::ConnectionId;
use crate::relay::shutdown::{CloseCause, ShutdownSignal};
use crate::transport::FrameRead;

// ============================================================================
// InboundRelay
// ============================================================================

/// Network-to-stream half of a connection.
pub struct InboundRelay {
    id: ConnectionId,
    max_payload: u64,
    pool: BufferPool,
    sink: mpsc::Sender<PooledBuffer>,
    shutdown: ShutdownSignal,
}

impl InboundRelay {
    /// Creates an inbound relay.
    ///
    /// # Arguments
    ///
    /// * `id` - Owning connection, for logging
    /// * `max_payload` - Payload ceiling in bytes
    /// * `pool` - Buffer pool for frame payloads
    /// * `sink` - Stream channel towards the consumer
    /// * `shutdown` - Signal of the connection's coordinator
    pub fn new(
        id: ConnectionId,
        max_payload: usize,
        pool: BufferPool,
        sink: mpsc::Sender<PooledBuffer>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            id,
            max_payload: max_payload as u64,
            pool,
            sink,
            shutdown,
        }
    }

    /// Runs until the peer closes, an error occurs, the consumer goes away
    /// or the connection starts closing.
    ///
    /// Returns why the relay stopped. The buffer held for the current
    /// iteration goes back to the pool on every exit path.
    pub async fn run(mut self, mut reader: Box<dyn FrameRead>) -> CloseCause {
        let expects_masked = reader.expects_masked();

        loop {
            let mut buf = self.pool.acquire();

            let read = tokio::select! {
                biased;
                () = self.shutdown.closing() => return CloseCause::Cancelled,
                read = reader.read_frame(&mut buf) => read,
            };

            let header = match read {
                Ok(header) => header,
                Err(e) => return self.fail(&e),
            };

            if header.opcode.is_control() {
                debug!(conn = %self.id, opcode = ?header.opcode, "Control frame received");
                return CloseCause::PeerClosed;
            }

            if let Err(e) = self.check(&header, &buf, expects_masked) {
                return self.fail(&e);
            }

            if let Some(key) = header.mask {
                unmask(&mut buf, key);
            }

            trace!(conn = %self.id, len = buf.len(), "Forwarding chunk");

            let sent = tokio::select! {
                biased;
                () = self.shutdown.closing() => return CloseCause::Cancelled,
                sent = self.sink.send(buf) => sent,
            };

            if sent.is_err() {
                debug!(conn = %self.id, "Stream consumer gone");
                return CloseCause::StreamEnded;
            }
        }
    }

    /// Validates a data frame against the ceiling and masking policy.
    fn check(&self, header: &FrameHeader, payload: &[u8], expects_masked: bool) -> Result<()> {
        if header.length > self.max_payload {
            return Err(Error::payload_too_large(header.length, self.max_payload));
        }

        if header.length != payload.len() as u64 {
            return Err(Error::malformed_frame(format!(
                "declared length {} but read {} bytes",
                header.length,
                payload.len()
            )));
        }

        if header.is_masked() != expects_masked {
            return Err(Error::UnexpectedMask {
                expected: expects_masked,
            });
        }

        Ok(())
    }

    fn fail(&self, err: &Error) -> CloseCause {
        let cause = CloseCause::from_error(err);
        if cause.is_error() {
            warn!(conn = %self.id, error = %err, "Inbound relay failed");
        } else {
            debug!(conn = %self.id, "Peer closed the stream");
        }
        cause
    }
}

// ============================================================================
// Tests
// ============================================================================
