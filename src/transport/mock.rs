//! In-memory transport for tests.
//!
//! [`MockReader`] replays frames pushed through a channel, as a simulated
//! peer would send them. [`MockWriter`] records every frame written and
//! counts close calls; it can also fail or stall every write.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameHeader};
use crate::transport::{FrameRead, FrameWrite};

// ============================================================================
// MockReader
// ============================================================================

/// Frames fed to a [`MockReader`]; an `Err` is returned from the read.
pub(crate) type PeerInput = Result<Frame>;

pub(crate) struct MockReader {
    rx: mpsc::UnboundedReceiver<PeerInput>,
    expects_masked: bool,
}

impl MockReader {
    /// Creates a reader and the sender that feeds it.
    ///
    /// Dropping the sender ends the stream.
    pub(crate) fn new(expects_masked: bool) -> (Self, mpsc::UnboundedSender<PeerInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx, expects_masked }, tx)
    }
}

#[async_trait]
impl FrameRead for MockReader {
    async fn read_frame(&mut self, payload: &mut Vec<u8>) -> Result<FrameHeader> {
        match self.rx.recv().await {
            Some(Ok(frame)) => {
                payload.extend_from_slice(&frame.payload);
                Ok(frame.header)
            }
            Some(Err(e)) => Err(e),
            None => Err(Error::ConnectionClosed),
        }
    }

    fn expects_masked(&self) -> bool {
        self.expects_masked
    }
}

// ============================================================================
// MockWriter
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct Recorded {
    pub(crate) frames: Vec<Frame>,
    pub(crate) closes: usize,
}

#[derive(Clone, Default)]
pub(crate) struct MockWriter {
    recorded: Arc<Mutex<Recorded>>,
    fail_writes: bool,
    stall_writes: bool,
}

impl MockWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A writer whose every write fails with a broken pipe.
    pub(crate) fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// A writer whose writes never complete, as with a peer that stopped
    /// reading. Closing still succeeds.
    pub(crate) fn stalled() -> Self {
        Self {
            stall_writes: true,
            ..Self::default()
        }
    }

    pub(crate) fn frames(&self) -> Vec<Frame> {
        self.recorded.lock().frames.clone()
    }

    pub(crate) fn closes(&self) -> usize {
        self.recorded.lock().closes
    }
}

#[async_trait]
impl FrameWrite for MockWriter {
    async fn write_frame(&mut self, header: FrameHeader, payload: &[u8]) -> Result<()> {
        if self.stall_writes {
            std::future::pending::<()>().await;
        }

        if self.fail_writes {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }

        self.recorded.lock().frames.push(Frame {
            header,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.recorded.lock().closes += 1;
        Ok(())
    }
}
