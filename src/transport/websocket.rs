//! tokio-tungstenite transport.
//!
//! [`WebSocketHandshake`] performs the HTTP upgrade with
//! `accept_async_with_config` and splits the stream into a [`WsReader`] and
//! a [`WsWriter`]. The library parses headers and unmasks client payloads,
//! so the reader reports frames as already unmasked.
//!
//! Message-level limits are set to the relay's payload ceiling; a capacity
//! error from the library surfaces as [`Error::PayloadTooLarge`].

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::trace;

use crate::config::RelayOptions;
use crate::error::{Error, Result};
use crate::frame::{FrameHeader, OpCode, decode_close_payload, encode_close_payload};
use crate::transport::{FrameRead, FrameWrite, Handshake};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<TcpStream>;

// ============================================================================
// WebSocketHandshake
// ============================================================================

/// Server-side WebSocket upgrade.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketHandshake {
    config: WebSocketConfig,
}

impl WebSocketHandshake {
    /// Creates a handshake whose message limits follow `options`.
    #[must_use]
    pub fn new(options: &RelayOptions) -> Self {
        let config = WebSocketConfig::default()
            .max_message_size(Some(options.max_payload_size))
            .max_frame_size(Some(options.max_payload_size));

        Self { config }
    }
}

impl Default for WebSocketHandshake {
    fn default() -> Self {
        Self::new(&RelayOptions::default())
    }
}

#[async_trait]
impl Handshake for WebSocketHandshake {
    async fn handshake(
        &self,
        stream: TcpStream,
    ) -> Result<(Box<dyn FrameRead>, Box<dyn FrameWrite>)> {
        let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(self.config))
            .await
            .map_err(|e| Error::handshake(e.to_string()))?;

        let (sink, stream) = ws_stream.split();

        Ok((
            Box::new(WsReader { stream }),
            Box::new(WsWriter { sink }),
        ))
    }
}

// ============================================================================
// WsReader
// ============================================================================

/// Read half of an upgraded WebSocket.
///
/// Ping and Pong messages are passed up like any other message. The library
/// still queues its own pong reply, but the relay treats the ping as a
/// control frame and ends the connection.
pub struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameRead for WsReader {
    async fn read_frame(&mut self, payload: &mut Vec<u8>) -> Result<FrameHeader> {
        let message = match self.stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(Error::from_websocket(e)),
            None => return Err(Error::ConnectionClosed),
        };

        let opcode = match message {
            Message::Text(text) => {
                payload.extend_from_slice(text.as_bytes());
                OpCode::Text
            }
            Message::Binary(data) => {
                payload.extend_from_slice(&data);
                OpCode::Binary
            }
            Message::Ping(data) => {
                payload.extend_from_slice(&data);
                OpCode::Ping
            }
            Message::Pong(data) => {
                payload.extend_from_slice(&data);
                OpCode::Pong
            }
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    payload.extend(encode_close_payload(u16::from(frame.code), &frame.reason));
                }
                OpCode::Close
            }
            Message::Frame(_) => {
                return Err(Error::malformed_frame("raw frame on a message stream"));
            }
        };

        trace!(?opcode, len = payload.len(), "Frame read");

        Ok(FrameHeader::unmasked(opcode, payload.len() as u64))
    }

    #[inline]
    fn expects_masked(&self) -> bool {
        false
    }
}

// ============================================================================
// WsWriter
// ============================================================================

/// Write half of an upgraded WebSocket.
pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameWrite for WsWriter {
    async fn write_frame(&mut self, header: FrameHeader, payload: &[u8]) -> Result<()> {
        if !header.fin || header.opcode == OpCode::Continuation {
            return Err(Error::malformed_frame("fragmented writes are not supported"));
        }

        if header.is_masked() {
            return Err(Error::UnexpectedMask { expected: false });
        }

        if header.length != payload.len() as u64 {
            return Err(Error::malformed_frame(format!(
                "header length {} does not match payload length {}",
                header.length,
                payload.len()
            )));
        }

        let message = match header.opcode {
            OpCode::Text => {
                let text = String::from_utf8(payload.to_vec()).map_err(|_| Error::InvalidUtf8)?;
                Message::Text(text.into())
            }
            OpCode::Binary => Message::Binary(payload.to_vec().into()),
            OpCode::Ping => Message::Ping(payload.to_vec().into()),
            OpCode::Pong => Message::Pong(payload.to_vec().into()),
            OpCode::Close => Message::Close(decode_close_payload(payload).map(|(code, reason)| {
                CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                }
            })),
            OpCode::Continuation => {
                return Err(Error::malformed_frame("fragmented writes are not supported"));
            }
        };

        self.sink.send(message).await.map_err(Error::from_websocket)?;

        trace!(opcode = ?header.opcode, len = payload.len(), "Frame written");

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(Error::from_websocket(e)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
