//! # Shared Types Crate
//!
//! Wire-level types shared by the transaction processor runtime, its hosting
//! binaries and the test validator.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every message exchanged with the validator is
//!   defined here.
//! - **Envelope Integrity**: [`RequestEnvelope`] is the sole wrapper for every
//!   frame; payloads never carry their own correlation data.
//! - **Typed Payloads**: each payload implements [`ProtocolMessage`], binding it
//!   to one [`MessageKind`] so a frame cannot be decoded as the wrong type.

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod messages;

pub use envelope::{CorrelationId, ProtocolMessage, RequestEnvelope};
pub use errors::CodecError;
pub use messages::*;
