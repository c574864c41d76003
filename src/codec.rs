//! Parsing and serialization of single wire frames.
//!
//! The [`Decoder`] works on a borrowed byte span and never consumes it: it reports how many
//! bytes the frame occupied, and the caller decides when to discard them. The [`Encoder`]
//! appends complete, final frames to a `BytesMut`.
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::{
    frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE},
    Result, WebSocketError,
};

/// The side of the connection a codec speaks for.
///
/// The channel always runs as [`Role::Client`]: outgoing frames are masked and incoming frames
/// must not be. [`Role::Server`] exists so the other end of a conversation can be produced and
/// checked, e.g. in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// A decoder for WebSocket frames.
///
/// Validation follows RFC 6455 Section 5 and happens as early as the header allows: a frame
/// that is already known to be illegal is rejected before its payload has arrived.
#[derive(Debug, Clone)]
pub struct Decoder {
    role: Role,
    /// Maximum allowed size for a single frame payload.
    max_payload_read: usize,
    /// Whether RSV1 carries the permessage-deflate flag.
    allow_rsv1: bool,
}

impl Decoder {
    /// Creates a decoder for frames received by `role`, rejecting payloads above
    /// `max_payload_read` bytes.
    pub fn new(role: Role, max_payload_read: usize) -> Self {
        Self {
            role,
            max_payload_read,
            allow_rsv1: false,
        }
    }

    /// Allows RSV1 on the first frame of a data message, once permessage-deflate is negotiated.
    pub fn set_allow_rsv1(&mut self, allow: bool) {
        self.allow_rsv1 = allow;
    }

    /// Attempts to parse one frame from the start of `src`.
    ///
    /// `in_continuation` tells whether a fragmented message is in progress, which decides
    /// whether Text/Binary or Continuation frames are legal.
    ///
    /// # Returns
    /// - `Ok(Some((frame, consumed)))`: a complete frame occupying the first `consumed` bytes.
    /// - `Ok(None)`: `src` holds a legal but incomplete frame.
    /// - `Err(WebSocketError)`: the frame violates the protocol or the payload limit.
    pub fn decode<'a>(
        &self,
        src: &'a [u8],
        in_continuation: bool,
    ) -> Result<Option<(Frame<'a>, usize)>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let fin = src[0] & 0b1000_0000 != 0;
        let rsv1 = src[0] & 0b0100_0000 != 0;
        let rsv2 = src[0] & 0b0010_0000 != 0;
        let rsv3 = src[0] & 0b0001_0000 != 0;
        let opcode = OpCode::try_from(src[0] & 0b0000_1111)?;

        if rsv2 || rsv3 {
            return Err(WebSocketError::ReservedBitsNotZero);
        }
        if rsv1 {
            if !self.allow_rsv1 {
                return Err(WebSocketError::CompressionNotSupported);
            }
            if !opcode.is_data() {
                return Err(WebSocketError::ReservedBitsNotZero);
            }
        }

        let masked = src[1] & 0b1000_0000 != 0;
        match self.role {
            Role::Client if masked => return Err(WebSocketError::MaskedFrame),
            Role::Server if !masked => return Err(WebSocketError::UnmaskedFrame),
            _ => {}
        }

        let length_code = src[1] & 0x7F;
        if opcode.is_control() {
            if !fin {
                return Err(WebSocketError::ControlFrameFragmented);
            }
            if usize::from(length_code) > MAX_CONTROL_PAYLOAD {
                return Err(WebSocketError::ControlFrameTooLarge);
            }
        }

        match opcode {
            OpCode::Text | OpCode::Binary if in_continuation => {
                return Err(WebSocketError::InvalidFragment)
            }
            OpCode::Continuation if !in_continuation => {
                return Err(WebSocketError::InvalidContinuationFrame)
            }
            _ => {}
        }

        let extra = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        if src.len() < 2 + extra {
            return Ok(None);
        }

        let payload_len: u64 = match extra {
            0 => u64::from(length_code),
            2 => u64::from(u16::from_be_bytes([src[2], src[3]])),
            _ => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&src[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(WebSocketError::InvalidPayloadLength);
                }
                len
            }
        };
        let payload_len = match usize::try_from(payload_len) {
            Ok(len) if len <= self.max_payload_read => len,
            _ => return Err(WebSocketError::FrameTooLarge),
        };

        let mut header_len = 2 + extra;
        let mask = if masked {
            if src.len() < header_len + 4 {
                return Ok(None);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&src[header_len..header_len + 4]);
            header_len += 4;
            Some(key)
        } else {
            None
        };

        let total = header_len + payload_len;
        if src.len() < total {
            return Ok(None);
        }

        let frame = Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            mask,
            payload: &src[header_len..total],
        };

        Ok(Some((frame, total)))
    }
}

/// WebSocket frame encoder.
///
/// Every frame produced through [`Encoder::encode`] is final (FIN set); when the encoder speaks
/// for a client, each frame is masked with a fresh random key.
#[derive(Debug, Clone)]
pub struct Encoder {
    role: Role,
}

impl Encoder {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    /// Appends a final frame carrying `payload` to `dst`.
    pub fn encode(&self, opcode: OpCode, payload: &[u8], dst: &mut BytesMut) {
        self.encode_frame(Frame::new(true, opcode, payload), dst);
    }

    /// Appends a final frame whose payload was deflated, flagged with RSV1.
    pub fn encode_compressed(&self, opcode: OpCode, payload: &[u8], dst: &mut BytesMut) {
        let mut frame = Frame::new(true, opcode, payload);
        frame.rsv1 = true;
        self.encode_frame(frame, dst);
    }

    /// Appends `frame` to `dst` as is, except for masking.
    ///
    /// `frame.payload` is taken as application data. A client encoder masks it with
    /// `frame.mask`, or a random key if none is set; a server encoder only masks when a key is
    /// given explicitly.
    pub fn encode_frame(&self, mut frame: Frame<'_>, dst: &mut BytesMut) {
        if self.role == Role::Client {
            frame.mask = Some(frame.mask.unwrap_or_else(rand::random));
        }

        let mut head = [0u8; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut head);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&head[..size]);
        let start = dst.len();
        dst.extend_from_slice(frame.payload);

        if let Some(mask) = frame.mask {
            crate::mask::apply_mask(&mut dst[start..], mask);
        }
    }

    /// Serializes a single final frame.
    pub fn serialize(&self, opcode: OpCode, payload: &[u8]) -> Bytes {
        let mut dst = BytesMut::with_capacity(MAX_HEAD_SIZE + payload.len());
        self.encode(opcode, payload, &mut dst);
        dst.freeze()
    }
}
