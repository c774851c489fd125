//! Frame model.
//!
//! Types exchanged with the frame transport: the opcode, a decoded
//! [`FrameHeader`], an owned [`Frame`] used for control messages, and the
//! in-place [`unmask`] primitive.
//!
//! Header parsing and serialization belong to the transport; this module
//! only describes what a frame *is* once decoded.
//!
//! [RFC-6455 Section 5](https://datatracker.ietf.org/doc/html/rfc6455#section-5)

// ============================================================================
// Constants
// ============================================================================

/// Largest close reason that fits a control frame (125 - 2 bytes of code).
pub const MAX_CLOSE_REASON_LEN: usize = 123;

// ============================================================================
// OpCode
// ============================================================================

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continuation of a fragmented message, 0x0.
    Continuation,
    /// Text data, 0x1.
    Text,
    /// Binary data, 0x2.
    Binary,
    /// Connection close, 0x8.
    Close,
    /// Ping, 0x9.
    Ping,
    /// Pong, 0xA.
    Pong,
}

impl OpCode {
    /// Returns the 4-bit wire value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xa,
        }
    }

    /// Returns `true` for Close, Ping and Pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        self.as_u8() & 0x8 != 0
    }
}

// ============================================================================
// FrameHeader
// ============================================================================

/// Decoded frame header.
///
/// `length` is the payload length declared on the wire; a transport that
/// hands over a payload of a different length produced a malformed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame opcode.
    pub opcode: OpCode,
    /// Last fragment of a message.
    pub fin: bool,
    /// Masking key, present iff the frame is masked.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub length: u64,
}

impl FrameHeader {
    /// Creates a header.
    #[inline]
    #[must_use]
    pub const fn new(opcode: OpCode, fin: bool, mask: Option<[u8; 4]>, length: u64) -> Self {
        Self {
            opcode,
            fin,
            mask,
            length,
        }
    }

    /// Header of a final, unmasked frame, as a server writes them.
    #[inline]
    #[must_use]
    pub const fn unmasked(opcode: OpCode, length: u64) -> Self {
        Self::new(opcode, true, None, length)
    }

    /// Returns `true` if the payload is masked.
    #[inline]
    #[must_use]
    pub const fn is_masked(&self) -> bool {
        self.mask.is_some()
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A frame with an owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header; `length` always equals `payload.len()`.
    pub header: FrameHeader,
    /// Payload bytes, masked iff `header.mask` is set.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a final, unmasked frame.
    #[must_use]
    pub fn new(opcode: OpCode, payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        Self {
            header: FrameHeader::unmasked(opcode, payload.len() as u64),
            payload,
        }
    }

    /// Builds a close frame carrying `code` and `reason`.
    ///
    /// The reason is cut on a character boundary to fit
    /// [`MAX_CLOSE_REASON_LEN`].
    #[must_use]
    pub fn close(code: u16, reason: &str) -> Self {
        Self::new(OpCode::Close, encode_close_payload(code, reason))
    }

    /// Masks the payload with `key`, as a client would before sending.
    #[must_use]
    pub fn masked(mut self, key: [u8; 4]) -> Self {
        unmask(&mut self.payload, key);
        self.header.mask = Some(key);
        self
    }
}

// ============================================================================
// Masking
// ============================================================================

/// XORs `payload` with the 4-byte masking key, in place.
///
/// Masking and unmasking are the same operation.
pub fn unmask(payload: &mut [u8], key: [u8; 4]) {
    let key4 = u32::from_ne_bytes(key);

    let mut words = payload.chunks_exact_mut(4);
    for word in &mut words {
        let v = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) ^ key4;
        word.copy_from_slice(&v.to_ne_bytes());
    }

    // the tail starts at a multiple of 4, so the key phase is unchanged
    for (b, k) in words.into_remainder().iter_mut().zip(key) {
        *b ^= k;
    }
}

// ============================================================================
// Close Payload
// ============================================================================

/// Encodes a close payload: big-endian status code followed by the reason.
#[must_use]
pub fn encode_close_payload(code: u16, reason: &str) -> Vec<u8> {
    let reason = truncate_on_char_boundary(reason, MAX_CLOSE_REASON_LEN);

    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// Decodes a close payload into status code and reason.
///
/// Returns `None` for an empty payload (close without status). A reason
/// that is not UTF-8 is replaced lossily.
#[must_use]
pub fn decode_close_payload(payload: &[u8]) -> Option<(u16, String)> {
    match payload {
        [hi, lo, reason @ ..] => Some((
            u16::from_be_bytes([*hi, *lo]),
            String::from_utf8_lossy(reason).into_owned(),
        )),
        _ => None,
    }
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }

    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// Tests
// ============================================================================
