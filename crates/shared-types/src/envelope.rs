//! # Request Envelope
//!
//! The single wrapper for every frame exchanged with the validator.
//!
//! ## Correlation
//!
//! - Requests carry a freshly generated `correlation_id`.
//! - Replies echo the `correlation_id` of the request they answer.
//! - Execution requests originate at the validator, so the processor's
//!   `TpProcessResponse` echoes the validator's id.

use crate::errors::CodecError;
use crate::messages::MessageKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation ID binding a request to its eventual reply.
///
/// Uses UUID v7 which is time-ordered, making it ideal for:
/// - Log correlation
/// - Request/response matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID (UUID v7)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A typed protocol payload bound to exactly one [`MessageKind`].
pub trait ProtocolMessage: Serialize + DeserializeOwned {
    /// The envelope kind this payload travels under.
    const KIND: MessageKind;
}

/// The envelope for all validator <-> processor communication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Identifier matching a reply to its request.
    pub correlation_id: CorrelationId,

    /// What `content` holds.
    pub message_kind: MessageKind,

    /// Encoded payload (bincode of the typed message).
    pub content: Vec<u8>,
}

impl RequestEnvelope {
    /// Encode a typed message under the given correlation id.
    pub fn encode<M: ProtocolMessage>(
        correlation_id: CorrelationId,
        message: &M,
    ) -> Result<Self, CodecError> {
        let content =
            bincode::serialize(message).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Self {
            correlation_id,
            message_kind: M::KIND,
            content,
        })
    }

    /// Encode a typed message as a new request with a fresh correlation id.
    pub fn request<M: ProtocolMessage>(message: &M) -> Result<Self, CodecError> {
        Self::encode(CorrelationId::new(), message)
    }

    /// Encode a typed reply to `request`, echoing its correlation id.
    pub fn reply_to<M: ProtocolMessage>(request: &Self, message: &M) -> Result<Self, CodecError> {
        Self::encode(request.correlation_id, message)
    }

    /// Decode the payload, checking that the envelope kind matches.
    pub fn decode<M: ProtocolMessage>(&self) -> Result<M, CodecError> {
        if self.message_kind != M::KIND {
            return Err(CodecError::KindMismatch {
                expected: M::KIND,
                actual: self.message_kind,
            });
        }
        bincode::deserialize(&self.content).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
