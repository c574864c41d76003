use bytes::{Bytes, BytesMut};

use crate::{frame::OpCode, Result, WebSocketError};

/// Reassembly state for a message split over several frames.
#[derive(Debug, Default)]
pub(crate) enum ContinuationState {
    #[default]
    Idle,
    Accumulating {
        /// `Text` or `Binary`, from the first frame.
        opcode: OpCode,
        /// Whether the first frame had RSV1 set.
        compressed: bool,
        data: BytesMut,
    },
}

impl ContinuationState {
    pub fn is_accumulating(&self) -> bool {
        matches!(self, Self::Accumulating { .. })
    }

    /// Starts a fragmented message with the payload of its first (non-final) frame.
    pub fn start(&mut self, opcode: OpCode, compressed: bool, payload: &[u8]) {
        *self = Self::Accumulating {
            opcode,
            compressed,
            data: BytesMut::from(payload),
        };
    }

    /// Appends the payload of a Continuation frame.
    pub fn append(&mut self, payload: &[u8], limit: usize) -> Result<()> {
        match self {
            Self::Idle => Err(WebSocketError::InvalidContinuationFrame),
            Self::Accumulating { data, .. } => {
                if data.len().saturating_add(payload.len()) > limit {
                    return Err(WebSocketError::FrameTooLarge);
                }
                data.extend_from_slice(payload);
                Ok(())
            }
        }
    }

    /// Takes the reassembled message and returns to `Idle`.
    pub fn finish(&mut self) -> Option<(OpCode, bool, Bytes)> {
        match std::mem::take(self) {
            Self::Idle => None,
            Self::Accumulating {
                opcode,
                compressed,
                data,
            } => Some((opcode, compressed, data.freeze())),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reassembly() {
        let mut state = ContinuationState::default();
        assert!(!state.is_accumulating());

        state.start(OpCode::Text, false, b"Te");
        assert!(state.is_accumulating());
        state.append(b"xt frame", 64).unwrap();
        state.append(b" 1", 64).unwrap();

        let (opcode, compressed, data) = state.finish().unwrap();
        assert_eq!(opcode, OpCode::Text);
        assert!(!compressed);
        assert_eq!(&data[..], b"Text frame 1");
        assert!(!state.is_accumulating());
        assert!(state.finish().is_none());
    }

    #[test]
    fn test_append_while_idle() {
        let mut state = ContinuationState::Idle;
        assert!(matches!(
            state.append(b"x", 64),
            Err(WebSocketError::InvalidContinuationFrame)
        ));
    }

    #[test]
    fn test_limit() {
        let mut state = ContinuationState::default();
        state.start(OpCode::Binary, true, &[0; 8]);
        assert!(matches!(
            state.append(&[0; 9], 16),
            Err(WebSocketError::FrameTooLarge)
        ));
        state.clear();
        assert!(!state.is_accumulating());
    }
}
