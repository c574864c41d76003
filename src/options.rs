use std::time::Duration;

use crate::compression::WebSocketExtensions;

/// The default maximum payload size for a single frame: 1 MiB.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The default limit for buffered, not yet processed bytes and for reassembled fragmented
/// messages: 2 MiB.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// TCP maximum segment lifetime.
pub const TCP_MAXIMUM_SEGMENT_LIFETIME: Duration = Duration::from_secs(2 * 60);

/// How long the channel waits for the server to close the connection once our Close frame
/// is out, before tearing the transport down itself.
pub const CLOSING_TIMEOUT: Duration = Duration::from_secs(2 * 2 * 60);

/// Compression level of the permessage-deflate compressor.
pub type CompressionLevel = flate2::Compression;

/// Configuration options for a channel.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Maximum allowed payload size for a single incoming frame, in bytes.
    ///
    /// Default: 1 MiB, [`MAX_PAYLOAD_READ`].
    pub max_payload_read: Option<usize>,

    /// Maximum number of received bytes kept while waiting for a complete frame, and maximum
    /// size of a message reassembled from fragments.
    ///
    /// Default: 2 MiB ([`MAX_READ_BUFFER`]), or twice `max_payload_read` if that is set.
    pub max_read_buffer: Option<usize>,

    /// Offer permessage-deflate with these settings. `None` disables compression.
    pub compression: Option<DeflateOptions>,
}

/// Configuration of the permessage-deflate extension (RFC 7692).
///
/// # Example
/// ```
/// use wschannel::{DeflateOptions, CompressionLevel};
///
/// let opts = DeflateOptions {
///     level: CompressionLevel::fast(),
///     server_no_context_takeover: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeflateOptions {
    /// Compression level (0-9) for outgoing messages.
    pub level: CompressionLevel,

    /// Asks the server to limit its LZ77 window. Valid range: 9-15 bits.
    #[cfg(feature = "zlib")]
    pub server_max_window_bits: Option<u8>,

    /// Announces a limit for the client's LZ77 window. Valid range: 9-15 bits.
    #[cfg(feature = "zlib")]
    pub client_max_window_bits: Option<u8>,

    /// Asks the server to reset its compression context after each message.
    pub server_no_context_takeover: bool,

    /// Resets the client's compression context after each message.
    pub client_no_context_takeover: bool,
}

impl Options {
    /// Enables permessage-deflate, compressing outgoing messages at `level`.
    ///
    /// # Example
    /// ```rust
    /// use wschannel::{Options, CompressionLevel};
    ///
    /// let options = Options::default()
    ///     .with_compression_level(CompressionLevel::new(6))
    ///     .with_max_payload_read(64 * 1024);
    /// ```
    pub fn with_compression_level(self, level: CompressionLevel) -> Self {
        let mut compression = self.compression.unwrap_or_default();
        compression.level = level;

        Self {
            compression: Some(compression),
            ..self
        }
    }

    /// Disables compression.
    pub fn without_compression(self) -> Self {
        Self {
            compression: None,
            ..self
        }
    }

    /// Sets the maximum allowed payload size for a single incoming frame.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Sets the limit for received bytes still waiting once complete frames are taken out, and
    /// for reassembled messages.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    /// Announces a limit for the client's compression window.
    #[cfg(feature = "zlib")]
    #[cfg_attr(docsrs, doc(cfg(feature = "zlib")))]
    pub fn with_client_max_window_bits(self, max_window_bits: u8) -> Self {
        let mut compression = self.compression.unwrap_or_default();
        compression.client_max_window_bits = Some(max_window_bits);
        Self {
            compression: Some(compression),
            ..self
        }
    }

    /// Asks the server to limit its compression window.
    #[cfg(feature = "zlib")]
    #[cfg_attr(docsrs, doc(cfg(feature = "zlib")))]
    pub fn with_server_max_window_bits(self, max_window_bits: u8) -> Self {
        let mut compression = self.compression.unwrap_or_default();
        compression.server_max_window_bits = Some(max_window_bits);
        Self {
            compression: Some(compression),
            ..self
        }
    }

    /// Asks the server to reset its compression context after every message, so the client's
    /// decompressor does not have to keep a window between messages.
    pub fn server_no_context_takeover(self) -> Self {
        let mut compression = self.compression.unwrap_or_default();
        compression.server_no_context_takeover = true;
        Self {
            compression: Some(compression),
            ..self
        }
    }

    /// Resets the client's compression context after every message.
    pub fn client_no_context_takeover(self) -> Self {
        let mut compression = self.compression.unwrap_or_default();
        compression.client_no_context_takeover = true;
        Self {
            compression: Some(compression),
            ..self
        }
    }

    /// The `Sec-WebSocket-Extensions` value the handshake should offer, if any.
    pub fn extension_offer(&self) -> Option<String> {
        self.compression
            .as_ref()
            .map(|compression| WebSocketExtensions::from(compression).to_string())
    }

    pub(crate) fn payload_limit(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    pub(crate) fn read_buffer_limit(&self) -> usize {
        self.max_read_buffer.unwrap_or_else(|| {
            self.max_payload_read
                .map(|payload_read| payload_read.saturating_mul(2))
                .unwrap_or(MAX_READ_BUFFER)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let options = Options::default();
        assert_eq!(options.payload_limit(), MAX_PAYLOAD_READ);
        assert_eq!(options.read_buffer_limit(), MAX_READ_BUFFER);
        assert!(options.extension_offer().is_none());
    }

    #[test]
    fn test_read_buffer_follows_payload_limit() {
        let options = Options::default().with_max_payload_read(1000);
        assert_eq!(options.read_buffer_limit(), 2000);

        let options = options.with_max_read_buffer(1500);
        assert_eq!(options.read_buffer_limit(), 1500);
    }

    #[test]
    fn test_extension_offer() {
        let options = Options::default().with_compression_level(CompressionLevel::best());
        assert_eq!(options.extension_offer().as_deref(), Some("permessage-deflate"));

        let options = options.client_no_context_takeover().server_no_context_takeover();
        assert_eq!(
            options.extension_offer().as_deref(),
            Some("permessage-deflate; server_no_context_takeover; client_no_context_takeover")
        );

        assert!(options.without_compression().extension_offer().is_none());
    }

    #[test]
    fn test_closing_timeout() {
        assert_eq!(CLOSING_TIMEOUT, TCP_MAXIMUM_SEGMENT_LIFETIME * 2);
        assert_eq!(CLOSING_TIMEOUT.as_secs(), 240);
    }
}
