//! # Error Types
//!
//! Errors shared by everything that reads or writes protocol frames.

use crate::messages::MessageKind;
use thiserror::Error;

/// Errors raised while encoding or decoding envelopes and frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Encode error: {0}")]
    Encode(String),

    /// The bytes do not form a valid message.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Envelope kind does not match the requested payload type.
    #[error("Kind mismatch: expected {expected:?}, got {actual:?}")]
    KindMismatch {
        expected: MessageKind,
        actual: MessageKind,
    },

    /// Frame body exceeds the negotiated maximum.
    #[error("Frame too large: {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
}
