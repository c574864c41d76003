use bytes::{Buf, Bytes, BytesMut};

use crate::{Result, WebSocketError};

/// Bytes received from the transport that have not been turned into frames yet.
///
/// Consumed frames are split off the front, so processed bytes are never looked at again
/// and the remaining tail is not copied.
#[derive(Debug)]
pub(crate) struct ReceiveBuffer {
    buf: BytesMut,
    limit: usize,
}

impl ReceiveBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            limit,
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Fails if more than `limit` bytes are still waiting after frames were taken out.
    ///
    /// A read may carry any number of complete frames; only the unprocessed tail counts.
    pub fn check_retained(&self) -> Result<()> {
        if self.buf.len() > self.limit {
            return Err(WebSocketError::ReadBufferFull);
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Discards a frame header and returns the payload that follows it.
    pub fn take(&mut self, header_len: usize, payload_len: usize) -> Bytes {
        self.buf.advance(header_len);
        self.buf.split_to(payload_len).freeze()
    }

    /// Drops everything, releasing the allocation.
    pub fn clear(&mut self) {
        self.buf = BytesMut::new();
    }
}
