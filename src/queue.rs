use std::{collections::VecDeque, fmt, rc::Rc};

use bytes::Bytes;

use crate::{frame::OpCode, materializer::DeferredPayload};

/// The content of an [`OutgoingMessage`].
#[derive(Clone)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
    /// Data that has to be produced asynchronously before it can be framed.
    Deferred(Rc<dyn DeferredPayload>),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Self::Binary(data) => f.debug_tuple("Binary").field(&data.len()).finish(),
            Self::Deferred(payload) => f.debug_tuple("Deferred").field(&payload.size()).finish(),
        }
    }
}

/// A logical message waiting to be framed and handed to the transport.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub(crate) opcode: OpCode,
    pub(crate) payload: Payload,
    pub(crate) internal: bool,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: Payload::Text(text.into()),
            internal: false,
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: Payload::Binary(data.into()),
            internal: false,
        }
    }

    /// A binary message whose bytes come from `payload` once it reaches the front of the queue.
    pub fn deferred(payload: Rc<dyn DeferredPayload>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: Payload::Deferred(payload),
            internal: false,
        }
    }

    pub(crate) fn control(opcode: OpCode, data: Bytes) -> Self {
        Self {
            opcode,
            payload: Payload::Binary(data),
            internal: false,
        }
    }

    /// Marks the message as internal traffic, which is kept out of the frame log.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }
}

/// Whether the queue still accepts messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueStatus {
    Open,
    /// A Close frame is queued; nothing may follow it.
    Closing,
    /// Everything, including the Close frame, has been handed to the transport or dropped.
    Closed,
}

/// FIFO of outgoing messages.
#[derive(Debug)]
pub(crate) struct OutgoingQueue {
    messages: VecDeque<OutgoingMessage>,
    status: QueueStatus,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            status: QueueStatus::Open,
        }
    }

    pub fn push_back(&mut self, message: OutgoingMessage) {
        self.messages.push_back(message);
    }

    /// Queues a control frame ahead of pending data messages, behind control frames already
    /// waiting, so replies keep their relative order.
    pub fn push_control(&mut self, message: OutgoingMessage) {
        let at = self
            .messages
            .iter()
            .position(|queued| !queued.opcode.is_control())
            .unwrap_or(self.messages.len());
        self.messages.insert(at, message);
    }

    pub fn pop_front(&mut self) -> Option<OutgoingMessage> {
        self.messages.pop_front()
    }

    pub fn push_front(&mut self, message: OutgoingMessage) {
        self.messages.push_front(message);
    }

    /// Replaces the first deferred entry with its materialized bytes, keeping its opcode.
    pub fn resolve_deferred(&mut self, data: Bytes) -> bool {
        let entry = self
            .messages
            .iter_mut()
            .find(|message| matches!(message.payload, Payload::Deferred(_)));
        match entry {
            Some(message) => {
                message.payload = Payload::Binary(data);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn status(&self) -> QueueStatus {
        self.status
    }

    pub fn set_status(&mut self, status: QueueStatus) {
        self.status = status;
    }
}
