//! # wschannel
//! Client-side implementation of the WebSocket protocol (RFC 6455) as a single-threaded,
//! callback-driven engine, with optional permessage-deflate compression (RFC 7692).
//!
//! The engine owns everything between the byte stream and the application: frame parsing and
//! construction, fragmentation reassembly, ping/pong replies, the closing handshake and an
//! ordered outgoing queue that can hold payloads still being produced asynchronously. It does
//! no I/O of its own. The opening HTTP handshake, the socket and TLS live in collaborators the
//! host plugs in:
//!
//! - a [`Transport`] the channel writes serialized frames to, and which reports open, data,
//!   close and failure events back through `Channel::did_*` methods;
//! - a [`Client`] receiving messages, closing-handshake progress and errors.
//!
//! # Features
//! The crate provides several optional features that can be enabled in your `Cargo.toml`:
//!
//! - `zlib`: Enables window size control for permessage-deflate through
//!   `client_max_window_bits` and `server_max_window_bits`.
//!
//! - `logging`: Enables debug logging for state transitions and frame processing using the
//!   `log` crate.
//!
//! - `simd`: Validates text messages with `simdutf8`.
//!
//! - `json`: Enables [`Channel::send_json`].
//!
//! # Runtime
//! A [`Channel`] is `!Send` and must be driven from one thread. The closing-handshake timer and
//! deferred payloads are spawned with [`tokio::task::spawn_local`], so calls that may start them
//! ([`Channel::close`], [`Channel::send_deferred`]) must happen inside a [`tokio::task::LocalSet`].
//!
//! # Example
//! ```no_run
//! use std::rc::Rc;
//! use bytes::Bytes;
//! use wschannel::{Channel, Client, Options, Transport, WebSocketError};
//!
//! struct Printer;
//!
//! impl Client for Printer {
//!     fn on_connected(&self, protocol: &str, _extensions: &str) {
//!         println!("connected ({protocol})");
//!     }
//!     fn on_text_message(&self, text: String) {
//!         println!("< {text}");
//!     }
//!     fn on_binary_message(&self, data: Bytes) {
//!         println!("< {} bytes", data.len());
//!     }
//!     fn on_closed(&self, was_clean: bool, code: u16, reason: &str) {
//!         println!("closed clean={was_clean} code={code} reason={reason}");
//!     }
//!     fn on_error(&self, error: &WebSocketError) {
//!         eprintln!("error: {error}");
//!     }
//! }
//!
//! struct Socket;
//!
//! impl Transport for Socket {
//!     fn send(&self, _data: &[u8]) -> bool { true }
//!     fn disconnect(&self) {}
//!     fn buffered_amount(&self) -> usize { 0 }
//! }
//!
//! # fn main() -> wschannel::Result<()> {
//! let client = Rc::new(Printer);
//! let socket = Rc::new(Socket);
//! let client_weak = Rc::downgrade(&client);
//! let socket_weak = Rc::downgrade(&socket);
//! let channel = Channel::new(client_weak, socket_weak, Options::default());
//! channel.connect("wss://echo.example.com".parse()?, &["chat"])?;
//! // ... the host's handshake collaborator runs, then:
//! channel.did_connect("chat", "");
//! channel.send_text("hello")?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

mod buffer;
mod channel;
pub mod close;
pub mod codec;
mod compression;
mod fragment;
pub mod frame;
mod mask;
mod materializer;
mod options;
mod queue;

use thiserror::Error;

pub use channel::{Channel, Client, ConnectionState, Transport};
pub use close::{CloseCode, CloseInfo};
pub use codec::Role;
pub use frame::{Frame, OpCode};
pub use materializer::DeferredPayload;
pub use options::{
    CompressionLevel, DeflateOptions, Options, CLOSING_TIMEOUT, MAX_PAYLOAD_READ,
    MAX_READ_BUFFER, TCP_MAXIMUM_SEGMENT_LIFETIME,
};
pub use queue::{OutgoingMessage, Payload};

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Broad classes of [`WebSocketError`].
///
/// Every kind except [`ErrorKind::Usage`] is fatal to the channel: it is reported once through
/// [`Client::on_error`] and the connection is torn down. Usage errors are returned to the caller
/// of the API method and leave the channel untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or illegal data from the peer.
    Protocol,
    /// A receive buffer or message would grow past its configured limit.
    Capacity,
    /// The underlying byte stream failed or refused data.
    Transport,
    /// A deferred payload could not be produced.
    Materialization,
    /// The API was called with invalid arguments or in the wrong state.
    Usage,
}

/// Represents errors that can occur during WebSocket operations.
///
/// The variants fall into the classes described by [`ErrorKind`]; see [`WebSocketError::kind`].
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Indicates receipt of a frame with a reserved opcode (0x3-0x7, 0xB-0xF).
    #[error("Unrecognized frame opcode: {0}")]
    InvalidOpCode(u8),

    /// Reserved bits in the frame header are set without an extension defining them.
    #[error("One or more reserved bits are on")]
    ReservedBitsNotZero,

    /// The server sent a masked frame. Servers must never mask frames.
    #[error("A server must not mask any frames that it sends to the client")]
    MaskedFrame,

    /// A client frame arrived without a mask. Only produced by a [`Role::Server`] decoder.
    #[error("A client must mask all frames that it sends to the server")]
    UnmaskedFrame,

    /// A control frame (ping, pong or close) was received with the FIN bit unset.
    #[error("Received fragmented control frame")]
    ControlFrameFragmented,

    /// A control frame announced a payload longer than 125 bytes.
    #[error("Received control frame having too long payload")]
    ControlFrameTooLarge,

    /// A new data frame arrived before the previous fragmented message finished.
    #[error("Received new data frame but previous continuous frame is unfinished")]
    InvalidFragment,

    /// A continuation frame arrived without a leading data frame.
    #[error("Received unexpected continuation frame")]
    InvalidContinuationFrame,

    /// A text message or close reason is not valid UTF-8.
    #[error("Could not decode a text frame as UTF-8")]
    InvalidUTF8,

    /// A close frame carried a one byte payload.
    #[error("Received a broken close frame containing an invalid size body")]
    InvalidCloseFrame,

    /// A close frame carried a status code that must not appear on the wire.
    #[error("Received a broken close frame containing a reserved status code: {0}")]
    InvalidCloseCode(u16),

    /// The most significant bit of a 64-bit payload length was set.
    #[error("Invalid frame payload length")]
    InvalidPayloadLength,

    /// A compressed frame arrived on a connection without permessage-deflate, or the server
    /// accepted compression that was never offered.
    #[error("Received compressed frame on stream that doesn't support compression")]
    CompressionNotSupported,

    /// The negotiated `Sec-WebSocket-Extensions` value could not be parsed.
    #[error("Invalid extension negotiation: {0}")]
    InvalidExtensions(String),

    /// Deflating or inflating a message failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// A frame or reassembled message exceeds the configured payload limit.
    #[error("Frame too large")]
    FrameTooLarge,

    /// The receive buffer would exceed its configured limit.
    #[error("Ran out of memory while receiving WebSocket data")]
    ReadBufferFull,

    /// The transport refused a serialized frame.
    #[error("Failed to send WebSocket frame")]
    SendFailed,

    /// The transport reported a failure.
    #[error("WebSocket network error: {0}")]
    Transport(String),

    /// A deferred payload failed to materialize or was cancelled.
    #[error("Failed to load deferred payload: {0}")]
    Materialization(#[source] std::io::Error),

    /// Returned when attempting to connect to a URL whose scheme is not `ws` or `wss`.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// A requested sub-protocol is empty, contains separators or is duplicated.
    #[error("Invalid sub-protocol: {0:?}")]
    InvalidProtocol(String),

    /// `connect()` was called twice, or after the channel left the connecting state.
    #[error("Connection was already started")]
    AlreadyConnecting,

    /// The channel has not completed its opening handshake.
    #[error("WebSocket is not connected")]
    NotConnected,

    /// Returned when attempting to send on a closing or closed connection.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The channel was closed by the host before the opening handshake finished.
    #[error("WebSocket is closed before the connection is established")]
    ClosedBeforeOpen,

    /// `close()` was called with a status code a client may not send.
    #[error("Close code {0} is not allowed")]
    InvalidCloseCodeArgument(u16),

    /// `close()` was called with a reason longer than 123 bytes.
    #[error("Close reason must not exceed 123 bytes")]
    InvalidCloseReason,

    /// `send_binary` was called with an offset/length outside of the buffer.
    #[error("Range {offset}..{offset}+{length} is out of bounds for {len} bytes")]
    InvalidRange {
        offset: usize,
        length: usize,
        len: usize,
    },

    /// Wraps errors from URL parsing that may occur when processing WebSocket URLs.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Occurs when serialization of JSON data fails.
    /// Only available when the `json` feature is enabled.
    #[cfg(feature = "json")]
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WebSocketError {
    /// Returns the class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidOpCode(_)
            | Self::ReservedBitsNotZero
            | Self::MaskedFrame
            | Self::UnmaskedFrame
            | Self::ControlFrameFragmented
            | Self::ControlFrameTooLarge
            | Self::InvalidFragment
            | Self::InvalidContinuationFrame
            | Self::InvalidUTF8
            | Self::InvalidCloseFrame
            | Self::InvalidCloseCode(_)
            | Self::InvalidPayloadLength
            | Self::CompressionNotSupported
            | Self::InvalidExtensions(_)
            | Self::Compression(_) => ErrorKind::Protocol,
            Self::FrameTooLarge | Self::ReadBufferFull => ErrorKind::Capacity,
            Self::SendFailed | Self::Transport(_) => ErrorKind::Transport,
            Self::Materialization(_) => ErrorKind::Materialization,
            Self::InvalidHttpScheme
            | Self::InvalidProtocol(_)
            | Self::AlreadyConnecting
            | Self::NotConnected
            | Self::ConnectionClosed
            | Self::ClosedBeforeOpen
            | Self::InvalidCloseCodeArgument(_)
            | Self::InvalidCloseReason
            | Self::InvalidRange { .. }
            | Self::UrlParseError(_) => ErrorKind::Usage,
            #[cfg(feature = "json")]
            Self::Json(_) => ErrorKind::Usage,
        }
    }

    /// Returns `true` for errors that tear the connection down.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::Usage
    }

    /// The close status a peer would be given for this error.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::InvalidUTF8 => CloseCode::Invalid,
            Self::CompressionNotSupported | Self::InvalidExtensions(_) => CloseCode::Extension,
            Self::FrameTooLarge | Self::ReadBufferFull => CloseCode::Size,
            Self::SendFailed | Self::Transport(_) => CloseCode::Abnormal,
            Self::Materialization(_) => CloseCode::Error,
            _ if self.kind() == ErrorKind::Protocol => CloseCode::Protocol,
            _ => CloseCode::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(WebSocketError::InvalidOpCode(3).kind(), ErrorKind::Protocol);
        assert_eq!(WebSocketError::InvalidCloseCode(1005).kind(), ErrorKind::Protocol);
        assert_eq!(WebSocketError::ReadBufferFull.kind(), ErrorKind::Capacity);
        assert_eq!(WebSocketError::FrameTooLarge.kind(), ErrorKind::Capacity);
        assert_eq!(WebSocketError::SendFailed.kind(), ErrorKind::Transport);
        assert_eq!(
            WebSocketError::Materialization(std::io::Error::other("gone")).kind(),
            ErrorKind::Materialization
        );
        assert_eq!(WebSocketError::NotConnected.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(WebSocketError::InvalidUTF8.close_code(), CloseCode::Invalid);
        assert_eq!(WebSocketError::MaskedFrame.close_code(), CloseCode::Protocol);
        assert_eq!(WebSocketError::ReadBufferFull.close_code(), CloseCode::Size);
        assert_eq!(
            WebSocketError::CompressionNotSupported.close_code(),
            CloseCode::Extension
        );
        assert_eq!(WebSocketError::SendFailed.close_code(), CloseCode::Abnormal);
    }

    #[test]
    fn test_usage_errors_are_not_fatal() {
        assert!(!WebSocketError::ConnectionClosed.is_fatal());
        assert!(!WebSocketError::InvalidCloseReason.is_fatal());
        assert!(WebSocketError::MaskedFrame.is_fatal());
    }
}
