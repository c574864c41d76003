use flate2::{FlushCompress, FlushDecompress, Status};
use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::{digit1, space0},
    combinator::opt,
    sequence::preceded,
    IResult, Parser,
};

use crate::{CompressionLevel, DeflateOptions, Result, WebSocketError};

static PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// Trailer removed from every compressed message and restored before inflating
/// (RFC 7692, Section 7.2.1).
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// permessage-deflate parameters, either offered by us or accepted by the server.
///
/// A window bits value of `0` stands for the parameter without a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebSocketExtensions {
    pub(crate) server_max_window_bits: Option<u8>,
    pub(crate) client_max_window_bits: Option<u8>,
    pub(crate) server_no_context_takeover: bool,
    pub(crate) client_no_context_takeover: bool,
}

impl<'a> From<&'a DeflateOptions> for WebSocketExtensions {
    fn from(value: &'a DeflateOptions) -> Self {
        Self {
            #[cfg(feature = "zlib")]
            server_max_window_bits: value.server_max_window_bits,
            #[cfg(not(feature = "zlib"))]
            server_max_window_bits: None,
            #[cfg(feature = "zlib")]
            client_max_window_bits: value.client_max_window_bits,
            #[cfg(not(feature = "zlib"))]
            client_max_window_bits: None,
            server_no_context_takeover: value.server_no_context_takeover,
            client_no_context_takeover: value.client_no_context_takeover,
        }
    }
}

impl std::fmt::Display for WebSocketExtensions {
    /// Formats the parameters as a `Sec-WebSocket-Extensions` value.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", PERMESSAGE_DEFLATE)?;

        if let Some(server_max_window_bits) = self.server_max_window_bits {
            if (9..16).contains(&server_max_window_bits) {
                write!(f, "; server_max_window_bits={}", server_max_window_bits)?;
            } else {
                write!(f, "; server_max_window_bits")?;
            }
        }
        if let Some(client_max_window_bits) = self.client_max_window_bits {
            if (9..16).contains(&client_max_window_bits) {
                write!(f, "; client_max_window_bits={}", client_max_window_bits)?;
            } else {
                write!(f, "; client_max_window_bits")?;
            }
        }
        if self.server_no_context_takeover {
            write!(f, "; server_no_context_takeover")?;
        }
        if self.client_no_context_takeover {
            write!(f, "; client_no_context_takeover")?;
        }

        Ok(())
    }
}

impl WebSocketExtensions {
    /// Looks for permessage-deflate in a negotiated `Sec-WebSocket-Extensions` value.
    ///
    /// Other extensions in the list are skipped; unknown parameters are ignored.
    pub fn find(header: &str) -> Result<Option<Self>> {
        for element in header.split(',') {
            let element = element.trim();
            let name = element.split(';').next().unwrap_or_default().trim();
            if name != PERMESSAGE_DEFLATE {
                continue;
            }
            return Self::parse(element)
                .map(Some)
                .map_err(|err| WebSocketError::InvalidExtensions(err.to_string()));
        }
        Ok(None)
    }

    fn parse(input: &str) -> std::result::Result<Self, nom::Err<nom::error::Error<&str>>> {
        let mut this = Self::default();
        let (remaining, _) = Self::parse_name(input)?;
        this.parse_params(remaining)?;
        Ok(this)
    }

    fn parse_name(input: &str) -> IResult<&str, &str> {
        (tag(PERMESSAGE_DEFLATE), space0)
            .parse(input)
            .map(|(remaining, (name, _))| (remaining, name))
    }

    fn parse_params<'a>(
        &mut self,
        mut input: &'a str,
    ) -> std::result::Result<(), nom::Err<nom::error::Error<&'a str>>> {
        while !input.is_empty() {
            let (remaining, (key, value)) = Self::parse_param(input)?;
            let bits = || {
                value
                    .and_then(|value| value.parse::<u8>().ok())
                    .unwrap_or_default()
            };
            match key {
                "client_no_context_takeover" => self.client_no_context_takeover = true,
                "server_no_context_takeover" => self.server_no_context_takeover = true,
                "server_max_window_bits" => self.server_max_window_bits = Some(bits()),
                "client_max_window_bits" => self.client_max_window_bits = Some(bits()),
                _ => {}
            }
            input = remaining;
        }

        Ok(())
    }

    /// Parses `; key` or `; key=value`.
    fn parse_param(input: &str) -> IResult<&str, (&str, Option<&str>)> {
        preceded(
            (tag(";"), space0),
            (
                take_while1(|c: char| c.is_alphanumeric() || c == '_'),
                opt(preceded((space0, tag("="), space0), digit1)),
            ),
        )
        .parse(input)
        .map(|(remaining, param)| (remaining.trim_start(), param))
    }
}

/// Window bits usable by zlib: values outside of 9-15 (including the valueless `0`) fall back
/// to the default window.
#[cfg(feature = "zlib")]
fn window_bits(bits: Option<u8>) -> Option<u8> {
    bits.filter(|bits| (8..16).contains(bits)).map(|bits| bits.max(9))
}

/// Compression state of a connection that negotiated permessage-deflate.
pub(crate) struct Compression {
    deflate: Deflate,
    inflate: Inflate,
}

impl Compression {
    /// Builds the compression contexts from what we offered and what the server accepted.
    ///
    /// Returns `Ok(None)` when the server did not accept permessage-deflate, and an error when
    /// it accepted an extension that was never offered.
    pub fn negotiate(offer: Option<&DeflateOptions>, accepted: &str) -> Result<Option<Self>> {
        let Some(agreed) = WebSocketExtensions::find(accepted)? else {
            return Ok(None);
        };
        let Some(offer) = offer else {
            return Err(WebSocketError::CompressionNotSupported);
        };

        #[cfg(feature = "logging")]
        log::debug!(
            "Negotiated permessage-deflate: client_no_context_takeover={} server_no_context_takeover={}",
            agreed.client_no_context_takeover,
            agreed.server_no_context_takeover
        );

        Ok(Some(Self {
            deflate: Deflate::new(offer.level, &agreed),
            inflate: Inflate::new(&agreed),
        }))
    }

    /// Compresses a whole outgoing message.
    pub fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        self.deflate.compress(input)
    }

    /// Inflates a whole incoming message, failing once the output exceeds `limit`.
    pub fn decompress(&mut self, input: &[u8], limit: usize) -> Result<Vec<u8>> {
        self.inflate.decompress(input, limit)
    }
}

struct Deflate {
    compress: flate2::Compress,
    no_context_takeover: bool,
}

impl Deflate {
    fn new(level: CompressionLevel, agreed: &WebSocketExtensions) -> Self {
        #[cfg(feature = "zlib")]
        let compress = match window_bits(agreed.client_max_window_bits) {
            Some(bits) => flate2::Compress::new_with_window_bits(level, false, bits),
            None => flate2::Compress::new(level, false),
        };
        #[cfg(not(feature = "zlib"))]
        let compress = flate2::Compress::new(level, false);

        Self {
            compress,
            no_context_takeover: agreed.client_no_context_takeover,
        }
    }

    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(input.len() / 2 + 64);
        let mut offset = 0;

        loop {
            if output.len() == output.capacity() {
                output.reserve(output.capacity().max(1024));
            }
            let before_in = self.compress.total_in();
            self.compress
                .compress_vec(&input[offset..], &mut output, FlushCompress::Sync)
                .map_err(|err| WebSocketError::Compression(err.to_string()))?;
            offset += (self.compress.total_in() - before_in) as usize;

            // a sync flush is complete once all input is taken and output space is left over
            if offset == input.len() && output.len() < output.capacity() {
                break;
            }
        }

        if output.ends_with(&DEFLATE_TRAILER) {
            output.truncate(output.len() - DEFLATE_TRAILER.len());
        }
        if self.no_context_takeover {
            self.compress.reset();
        }

        Ok(output)
    }
}

struct Inflate {
    decompress: flate2::Decompress,
    no_context_takeover: bool,
}

impl Inflate {
    fn new(agreed: &WebSocketExtensions) -> Self {
        #[cfg(feature = "zlib")]
        let decompress = match window_bits(agreed.server_max_window_bits) {
            Some(bits) => flate2::Decompress::new_with_window_bits(false, bits),
            None => flate2::Decompress::new(false),
        };
        #[cfg(not(feature = "zlib"))]
        let decompress = flate2::Decompress::new(false);

        Self {
            decompress,
            no_context_takeover: agreed.server_no_context_takeover,
        }
    }

    fn decompress(&mut self, input: &[u8], limit: usize) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(input.len() + DEFLATE_TRAILER.len());
        data.extend_from_slice(input);
        data.extend_from_slice(&DEFLATE_TRAILER);

        let mut output = Vec::with_capacity((input.len() * 2).clamp(64, limit.max(64)));
        let mut offset = 0;

        loop {
            if output.len() == output.capacity() {
                output.reserve(output.capacity().max(1024));
            }
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(&data[offset..], &mut output, FlushDecompress::Sync)
                .map_err(|err| WebSocketError::Compression(err.to_string()))?;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = self.decompress.total_out() - before_out;
            offset += consumed;

            if output.len() > limit {
                return Err(WebSocketError::FrameTooLarge);
            }
            if status == Status::StreamEnd {
                // the peer finished the deflate stream, nothing can build on this context
                self.decompress.reset(false);
                return Ok(output);
            }
            if offset == data.len() && output.len() < output.capacity() {
                break;
            }
            if consumed == 0 && produced == 0 && output.len() < output.capacity() {
                return Err(WebSocketError::Compression(
                    "corrupt deflate stream".to_owned(),
                ));
            }
        }

        if self.no_context_takeover {
            self.decompress.reset(false);
        }

        Ok(output)
    }
}
