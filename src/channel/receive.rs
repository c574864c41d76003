use bytes::Bytes;

use super::{Channel, ConnectionState, Shared};
use crate::{
    close::CloseInfo,
    frame::{bytes_into_string, OpCode},
    queue::{OutgoingMessage, QueueStatus},
    Result, WebSocketError,
};

/// What a parsed frame asks the channel to do once its state is no longer borrowed.
enum Step {
    /// Nothing to deliver; look at the next frame.
    Next,
    /// Nothing more can be processed right now.
    Stop,
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Close(CloseInfo),
    Fail(WebSocketError),
}

/// Header fields copied out of a decoded frame, so the receive buffer can be split afterwards.
struct Head {
    fin: bool,
    rsv1: bool,
    opcode: OpCode,
    header_len: usize,
    payload_len: usize,
}

impl Channel {
    /// Delivers every complete frame in the receive buffer, then fails the channel if what is
    /// left over is larger than the read buffer limit.
    ///
    /// Stops when the channel is suspended, discarding input, still connecting, or has no
    /// client. Nested calls from inside a callback return immediately; the outer loop picks up
    /// whatever they would have processed.
    pub(super) fn process_buffer(&self) {
        {
            let mut shared = self.shared();
            if shared.processing {
                return;
            }
            shared.processing = true;
        }

        let this = self.clone();
        loop {
            let step = this.next_step();
            if !this.run_step(step) {
                break;
            }
        }
        let retained = {
            let mut shared = this.shared();
            shared.processing = false;
            if shared.discard_received {
                Ok(())
            } else {
                shared.buffer.check_retained()
            }
        };
        if let Err(err) = retained {
            this.fail(err);
        }
    }

    fn next_step(&self) -> Step {
        let mut guard = self.shared();
        let shared = &mut *guard;

        let has_client = shared
            .client
            .as_ref()
            .is_some_and(|client| client.strong_count() > 0);
        if shared.suspended
            || shared.discard_received
            || shared.state == ConnectionState::Connecting
            || shared.buffer.is_empty()
            || !has_client
        {
            return Step::Stop;
        }

        let in_continuation = shared.continuation.is_accumulating();
        let head = match shared.decoder.decode(shared.buffer.as_slice(), in_continuation) {
            Ok(Some((frame, consumed))) => Head {
                fin: frame.fin,
                rsv1: frame.rsv1,
                opcode: frame.opcode,
                header_len: consumed - frame.payload.len(),
                payload_len: frame.payload.len(),
            },
            Ok(None) => return Step::Stop,
            Err(err) => return Step::Fail(err),
        };
        let payload = shared.buffer.take(head.header_len, head.payload_len);

        #[cfg(feature = "logging")]
        log::trace!(
            "Received {:?} frame (fin: {}, compressed: {}, {} bytes)",
            head.opcode,
            head.fin,
            head.rsv1,
            head.payload_len
        );

        match shared.handle_frame(head, payload) {
            Ok(step) => step,
            Err(err) => Step::Fail(err),
        }
    }

    /// Runs `step` with no borrow held. Returns whether processing should go on.
    fn run_step(&self, step: Step) -> bool {
        match step {
            Step::Next => true,
            Step::Stop => false,
            Step::Text(text) => {
                if let Some(client) = self.client() {
                    client.on_text_message(text);
                }
                true
            }
            Step::Binary(data) => {
                if let Some(client) = self.client() {
                    client.on_binary_message(data);
                }
                true
            }
            Step::Ping(data) => {
                self.shared()
                    .queue
                    .push_control(OutgoingMessage::control(OpCode::Pong, data));
                self.process_outgoing_queue();
                true
            }
            Step::Close(info) => {
                self.did_receive_close(info);
                false
            }
            Step::Fail(err) => {
                self.fail(err);
                false
            }
        }
    }
}

impl Shared {
    fn handle_frame(&mut self, head: Head, payload: Bytes) -> Result<Step> {
        match head.opcode {
            OpCode::Continuation => {
                self.continuation
                    .append(&payload, self.options.read_buffer_limit())?;
                if !head.fin {
                    return Ok(Step::Next);
                }
                match self.continuation.finish() {
                    Some((opcode, compressed, data)) => self.complete_message(opcode, compressed, data),
                    None => Err(WebSocketError::InvalidContinuationFrame),
                }
            }
            OpCode::Text | OpCode::Binary if !head.fin => {
                self.continuation.start(head.opcode, head.rsv1, &payload);
                Ok(Step::Next)
            }
            OpCode::Text | OpCode::Binary => self.complete_message(head.opcode, head.rsv1, payload),
            // no Pong after our Close, or once the transport is gone
            OpCode::Ping if self.close_enqueued || self.queue.status() == QueueStatus::Closed => {
                Ok(Step::Next)
            }
            OpCode::Ping => Ok(Step::Ping(payload)),
            OpCode::Pong => Ok(Step::Next),
            OpCode::Close => CloseInfo::parse(&payload).map(Step::Close),
        }
    }

    /// Turns a whole message into a delivery, inflating it first if it was compressed.
    fn complete_message(&mut self, opcode: OpCode, compressed: bool, data: Bytes) -> Result<Step> {
        let data = if compressed {
            let limit = self.options.read_buffer_limit();
            let compression = self
                .compression
                .as_mut()
                .ok_or(WebSocketError::CompressionNotSupported)?;
            Bytes::from(compression.decompress(&data, limit)?)
        } else {
            data
        };

        match opcode {
            OpCode::Text => bytes_into_string(data).map(Step::Text),
            _ => Ok(Step::Binary(data)),
        }
    }
}
