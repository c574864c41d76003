//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! A [`Frame`] is ephemeral: it borrows its payload straight out of the receive buffer (or
//! out of the caller's data when encoding) and never outlives the span it was parsed from.
//! Owned message data only exists after reassembly, in the channel.
use std::borrow::Cow;

use bytes::Bytes;

use crate::{Result, WebSocketError};

/// WebSocket operation code (OpCode) that determines the semantic meaning and handling of a frame.
///
/// # Data Frame OpCodes
/// - `Continuation`: Continues a fragmented message started by another data frame
/// - `Text`: Contains UTF-8 encoded text data
/// - `Binary`: Contains raw binary data
///
/// # Control Frame OpCodes
/// - `Close`: Initiates or confirms connection closure
/// - `Ping`: Tests connection liveness, requiring a `Pong` response
/// - `Pong`: Responds to a `Ping` frame
///
/// The ranges 0x3-0x7 and 0xB-0xF are reserved and rejected when parsing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`, `Ping`, or `Pong`).
    ///
    /// Control frames cannot be fragmented and carry at most 125 bytes of payload.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Returns `true` for `Text` and `Binary`, the opcodes that start a message.
    pub fn is_data(&self) -> bool {
        matches!(*self, OpCode::Text | OpCode::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Largest possible frame header: 2 fixed bytes, 8 bytes of extended length and a 4 byte mask.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// A single WebSocket frame borrowing its payload.
///
/// When `mask` is set, `payload` holds the bytes as they appear on the wire (masked);
/// use [`Frame::unmasked_payload`] to read the application data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    /// Per-message compression flag when permessage-deflate is negotiated.
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// The masking key for the frame, if any.
    pub mask: Option<[u8; 4]>,
    /// The payload of the frame.
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Creates an unmasked frame with all reserved bits cleared.
    pub fn new(fin: bool, opcode: OpCode, payload: &'a [u8]) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload,
        }
    }

    /// Returns whether the frame is masked.
    #[inline(always)]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    #[inline(always)]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Returns the application data, unmasking a copy of the payload if the frame is masked.
    pub fn unmasked_payload(&self) -> Cow<'a, [u8]> {
        match self.mask {
            Some(mask) => {
                let mut data = self.payload.to_vec();
                crate::mask::apply_mask(&mut data, mask);
                Cow::Owned(data)
            }
            None => Cow::Borrowed(self.payload),
        }
    }

    /// Formats the frame header into `head` and returns its size.
    ///
    /// The length uses the shortest encoding (7, 16 or 64 bit). The mask key, if any, is
    /// written after the length; masking the payload itself is left to the caller.
    ///
    /// # Panics
    /// Panics if `head` is shorter than the formatted header ([`MAX_HEAD_SIZE`] always fits).
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7
            | (self.rsv1 as u8) << 6
            | (self.rsv2 as u8) << 5
            | (self.rsv3 as u8) << 4
            | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}

/// Validates `data` as UTF-8 and converts it into a `String`.
pub(crate) fn decode_utf8(data: &[u8]) -> Result<String> {
    #[cfg(feature = "simd")]
    let text = simdutf8::basic::from_utf8(data).map_err(|_| WebSocketError::InvalidUTF8)?;
    #[cfg(not(feature = "simd"))]
    let text = std::str::from_utf8(data).map_err(|_| WebSocketError::InvalidUTF8)?;

    Ok(text.to_owned())
}

/// Like [`decode_utf8`] for an owned buffer.
pub(crate) fn bytes_into_string(data: Bytes) -> Result<String> {
    decode_utf8(&data)
}
