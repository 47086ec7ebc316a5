//! # Frame Codec
//!
//! Length-prefixed framing for [`RequestEnvelope`]s.
//!
//! ```text
//! ┌──────────────────────┬───────────────────────────────────┐
//! │ length (u32, BE)     │ bincode(RequestEnvelope)          │
//! └──────────────────────┴───────────────────────────────────┘
//! ```
//!
//! The length covers the body only. Bodies larger than the configured maximum
//! are a protocol violation: the reader cannot resynchronise safely.

use crate::envelope::RequestEnvelope;
use crate::errors::CodecError;

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default upper bound on a single frame body (64 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Largest body the u32 length prefix can describe.
pub const MAX_WIRE_FRAME_LEN: usize = u32::MAX as usize;

/// Encode an envelope into a frame body (no length prefix).
pub fn encode_body(envelope: &RequestEnvelope, max_len: usize) -> Result<Vec<u8>, CodecError> {
    let body = bincode::serialize(envelope).map_err(|e| CodecError::Encode(e.to_string()))?;
    check_frame_len(body.len(), max_len)?;
    Ok(body)
}

/// Encode an envelope into a complete frame (prefix + body).
pub fn encode_frame(envelope: &RequestEnvelope, max_len: usize) -> Result<Vec<u8>, CodecError> {
    let body = encode_body(envelope, max_len)?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    let len = u32::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge {
        len: body.len(),
        max: MAX_WIRE_FRAME_LEN,
    })?;
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Validate a body length against `max_len`, never beyond what the prefix
/// can carry.
pub fn check_frame_len(len: usize, max_len: usize) -> Result<usize, CodecError> {
    let max = max_len.min(MAX_WIRE_FRAME_LEN);
    if len > max {
        return Err(CodecError::FrameTooLarge { len, max });
    }
    Ok(len)
}

/// Decode a frame body (without its length prefix).
pub fn decode_body(body: &[u8]) -> Result<RequestEnvelope, CodecError> {
    bincode::deserialize(body).map_err(|e| CodecError::Decode(e.to_string()))
}
