//! # Processor Protocol Messages
//!
//! Payloads exchanged between a transaction processor and its validator.
//!
//! ## Design Rules
//!
//! - Every payload is wrapped in a [`RequestEnvelope`](crate::RequestEnvelope).
//! - Request/response pairs are matched by the envelope's `correlation_id`.
//! - State access payloads name the execution they belong to via `context_id`.

use crate::envelope::ProtocolMessage;
use serde::{Deserialize, Serialize};

/// Current processor protocol version announced at registration.
pub const PROTOCOL_VERSION: u32 = 1;

/// Kind tag carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    TpRegisterRequest,
    TpRegisterResponse,
    TpUnregisterRequest,
    TpUnregisterResponse,
    TpProcessRequest,
    TpProcessResponse,
    TpStateGetRequest,
    TpStateGetResponse,
    TpStateSetRequest,
    TpStateSetResponse,
    TpStateDeleteRequest,
    TpStateDeleteResponse,
    TpEventAddRequest,
    TpEventAddResponse,
    TpReceiptAddDataRequest,
    TpReceiptAddDataResponse,
    PingRequest,
    PingResponse,
}

impl MessageKind {
    /// Whether this kind answers a request issued by the processor.
    ///
    /// Replies are routed to the correlation table instead of the dispatcher.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            Self::TpRegisterResponse
                | Self::TpUnregisterResponse
                | Self::TpStateGetResponse
                | Self::TpStateSetResponse
                | Self::TpStateDeleteResponse
                | Self::TpEventAddResponse
                | Self::TpReceiptAddDataResponse
                | Self::PingResponse
        )
    }

    /// The reply kind expected for a processor-issued request.
    #[must_use]
    pub fn reply_kind(&self) -> Option<MessageKind> {
        match self {
            Self::TpRegisterRequest => Some(Self::TpRegisterResponse),
            Self::TpUnregisterRequest => Some(Self::TpUnregisterResponse),
            Self::TpStateGetRequest => Some(Self::TpStateGetResponse),
            Self::TpStateSetRequest => Some(Self::TpStateSetResponse),
            Self::TpStateDeleteRequest => Some(Self::TpStateDeleteResponse),
            Self::TpEventAddRequest => Some(Self::TpEventAddResponse),
            Self::TpReceiptAddDataRequest => Some(Self::TpReceiptAddDataResponse),
            Self::PingRequest => Some(Self::PingResponse),
            Self::TpProcessRequest => Some(Self::TpProcessResponse),
            _ => None,
        }
    }
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Announces one (family, version) pair and the namespaces it may touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpRegisterRequest {
    pub family: String,
    pub version: String,
    pub namespaces: Vec<String>,
    /// Maximum concurrent executions the validator should schedule.
    pub max_occupancy: u32,
    pub protocol_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpRegisterResponse {
    pub status: RegisterStatus,
    pub protocol_version: u32,
}

/// Withdraws every registration held by this connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpUnregisterRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpUnregisterResponse {
    pub status: RegisterStatus,
}

// =============================================================================
// EXECUTION
// =============================================================================

/// Header of the transaction being executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    pub family_name: String,
    pub family_version: String,
    /// Addresses the transaction declared it may read.
    pub inputs: Vec<String>,
    /// Addresses the transaction declared it may write.
    pub outputs: Vec<String>,
    pub signer_public_key: String,
    pub batcher_public_key: String,
    pub dependencies: Vec<String>,
    pub nonce: String,
    pub payload_sha512: String,
}

/// Validator asks the processor to execute one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpProcessRequest {
    pub header: TransactionHeader,
    pub payload: Vec<u8>,
    pub signature: String,
    /// Validator-side state context all state calls must name.
    pub context_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Ok,
    InvalidTransaction,
    InternalError,
    /// No registered handler matched the request.
    Unhandled,
}

/// Terminal reply for one execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpProcessResponse {
    pub status: ProcessStatus,
    pub message: String,
    pub extended_data: Vec<u8>,
}

// =============================================================================
// STATE ACCESS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateStatus {
    Ok,
    AuthorizationError,
}

/// One address and its data. Empty data means the address is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpStateEntry {
    pub address: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpStateGetRequest {
    pub context_id: String,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpStateGetResponse {
    pub entries: Vec<TpStateEntry>,
    pub status: StateStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpStateSetRequest {
    pub context_id: String,
    pub entries: Vec<TpStateEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpStateSetResponse {
    pub addresses: Vec<String>,
    pub status: StateStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpStateDeleteRequest {
    pub context_id: String,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpStateDeleteResponse {
    pub addresses: Vec<String>,
    pub status: StateStatus,
}

// =============================================================================
// EVENTS & RECEIPTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddStatus {
    Ok,
    Error,
}

/// Application event emitted during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub attributes: Vec<(String, String)>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpEventAddRequest {
    pub context_id: String,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpEventAddResponse {
    pub status: AddStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpReceiptAddDataRequest {
    pub context_id: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpReceiptAddDataResponse {
    pub status: AddStatus,
}

// =============================================================================
// HEARTBEAT
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {}

macro_rules! protocol_message {
    ($($ty:ident),* $(,)?) => {
        $(
            impl ProtocolMessage for $ty {
                const KIND: MessageKind = MessageKind::$ty;
            }
        )*
    };
}

protocol_message!(
    TpRegisterRequest,
    TpRegisterResponse,
    TpUnregisterRequest,
    TpUnregisterResponse,
    TpProcessRequest,
    TpProcessResponse,
    TpStateGetRequest,
    TpStateGetResponse,
    TpStateSetRequest,
    TpStateSetResponse,
    TpStateDeleteRequest,
    TpStateDeleteResponse,
    TpEventAddRequest,
    TpEventAddResponse,
    TpReceiptAddDataRequest,
    TpReceiptAddDataResponse,
    PingRequest,
    PingResponse,
);
