use std::{io, mem, rc::Rc};

use bytes::{Bytes, BytesMut};

use super::{Channel, Materialization, Shared, Transport};
use crate::{
    frame::{OpCode, MAX_HEAD_SIZE},
    materializer::{DeferredPayload, Materializer},
    queue::{OutgoingMessage, Payload, QueueStatus},
    Result, WebSocketError,
};

/// The next thing the drain loop does once the state borrow is released.
enum Action {
    Send(Rc<dyn Transport>, Bytes),
    Materialize(Rc<dyn DeferredPayload>),
    /// Both Close frames are through; hand the stream back.
    CloseTransport(Rc<dyn Transport>),
    Fail(WebSocketError),
    Idle,
}

impl Channel {
    /// Hands queued messages to the transport in order until the queue is empty or blocked
    /// on a deferred payload.
    pub(super) fn process_outgoing_queue(&self) {
        {
            let mut shared = self.shared();
            if shared.draining {
                return;
            }
            shared.draining = true;
        }

        let this = self.clone();
        loop {
            let action = this.shared().next_action();
            match action {
                Action::Send(transport, frame) => {
                    if !transport.send(&frame) {
                        this.fail(WebSocketError::SendFailed);
                        break;
                    }
                }
                Action::Materialize(payload) => {
                    this.start_materialization(payload);
                    break;
                }
                Action::CloseTransport(transport) => {
                    #[cfg(feature = "logging")]
                    log::debug!("Closing handshake complete, closing transport");

                    transport.close();
                    break;
                }
                Action::Fail(err) => {
                    this.fail(err);
                    break;
                }
                Action::Idle => break,
            }
        }
        this.shared().draining = false;
    }

    fn start_materialization(&self, payload: Rc<dyn DeferredPayload>) {
        #[cfg(feature = "logging")]
        log::debug!("Materializing deferred payload (size: {:?})", payload.size());

        let weak = self.downgrade();
        let materializer = Materializer::start(&*payload, move |result| {
            if let Some(channel) = Channel::from_weak(&weak) {
                channel.did_finish_materialization(result);
            }
        });

        let mut shared = self.shared();
        if shared.failed || shared.queue.status() == QueueStatus::Closed {
            // torn down while the payload was being asked for
            drop(shared);
            drop(materializer);
            return;
        }
        shared.materialization = Materialization::InFlight(materializer);
    }

    fn did_finish_materialization(&self, result: io::Result<Bytes>) {
        let this = self.clone();
        let finished = mem::replace(&mut this.shared().materialization, Materialization::Idle);

        match result {
            Ok(data) => {
                if !matches!(finished, Materialization::InFlight(_)) {
                    this.shared().materialization = finished;
                    return;
                }
                let resolved = this.shared().queue.resolve_deferred(data);
                drop(finished);
                if resolved {
                    this.process_outgoing_queue();
                }
            }
            Err(err) => {
                this.shared().materialization = Materialization::Failed;
                drop(finished);
                this.fail(WebSocketError::Materialization(err));
            }
        }
    }

    /// Drops everything still queued and cancels an in-flight materialization.
    pub(super) fn abort_outgoing_queue(&self) {
        let in_flight = {
            let mut shared = self.shared();

            if !shared.queue.is_empty() {
                #[cfg(feature = "logging")]
                log::debug!("Dropping {} queued messages", shared.queue.len());

                shared.queue.clear();
            }
            shared.queue.set_status(QueueStatus::Closed);
            match mem::replace(&mut shared.materialization, Materialization::Idle) {
                Materialization::InFlight(materializer) => Some(materializer),
                other => {
                    shared.materialization = other;
                    None
                }
            }
        };

        if let Some(mut materializer) = in_flight {
            materializer.cancel();
        }
    }
}

impl Shared {
    fn next_action(&mut self) -> Action {
        if self.failed || self.queue.status() == QueueStatus::Closed {
            return Action::Idle;
        }

        let Some(message) = self.queue.pop_front() else {
            if self.queue.status() == QueueStatus::Closing && self.close_sent && self.close_received {
                self.queue.set_status(QueueStatus::Closed);
                if !self.transport_closed {
                    if let Some(transport) = self.transport() {
                        return Action::CloseTransport(transport);
                    }
                }
            }
            return Action::Idle;
        };

        let data = match message.payload {
            Payload::Text(text) => Bytes::from(text),
            Payload::Binary(data) => data,
            Payload::Deferred(payload) => {
                let action = match self.materialization {
                    Materialization::Idle => Action::Materialize(Rc::clone(&payload)),
                    Materialization::InFlight(_) | Materialization::Failed => Action::Idle,
                };
                self.queue.push_front(OutgoingMessage {
                    payload: Payload::Deferred(payload),
                    ..message
                });
                return action;
            }
        };

        let Some(transport) = self.transport() else {
            return Action::Fail(WebSocketError::SendFailed);
        };
        let frame = match self.encode_message(message.opcode, &data) {
            Ok(frame) => frame,
            Err(err) => return Action::Fail(err),
        };

        #[cfg(feature = "logging")]
        if !message.internal {
            log::trace!(
                "Sending {:?} frame ({} bytes, {} on the wire)",
                message.opcode,
                data.len(),
                frame.len()
            );
        }

        if message.opcode == OpCode::Close {
            self.close_sent = true;
        }
        Action::Send(transport, frame)
    }

    /// Frames one message, deflating data messages when compression was negotiated.
    fn encode_message(&mut self, opcode: OpCode, data: &[u8]) -> Result<Bytes> {
        match self.compression.as_mut() {
            Some(compression) if opcode.is_data() => {
                let compressed = compression.compress(data)?;
                let mut dst = BytesMut::with_capacity(MAX_HEAD_SIZE + compressed.len());
                self.encoder.encode_compressed(opcode, &compressed, &mut dst);
                Ok(dst.freeze())
            }
            _ => Ok(self.encoder.serialize(opcode, data)),
        }
    }
}
