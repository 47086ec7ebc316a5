//! # Error Types
//!
//! One enum per layer. Startup errors surface from `start()`; per-request
//! errors stay inside that request's reply; protocol anomalies are logged.

use shared_types::{CodecError, CorrelationId};
use thiserror::Error;

/// Errors returned to the hosting process.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Every connect attempt in the retry budget failed.
    #[error("Connect failed after {attempts} attempts: {reason}")]
    Connect { attempts: u32, reason: String },

    /// Registration was rejected or timed out on every attempt.
    #[error("Registration failed after {attempts} attempts: {reason}")]
    Registration { attempts: u32, reason: String },

    /// Two handlers claim the same (family, version, prefix).
    #[error("Conflicting prefix {prefix} for {family} {version}")]
    ConflictingPrefix {
        family: String,
        version: String,
        prefix: String,
    },

    /// A handler descriptor is malformed.
    #[error("Invalid handler descriptor: {0}")]
    InvalidDescriptor(String),

    /// `start()` was called with no handlers registered.
    #[error("No handlers registered")]
    NoHandlers,

    /// Handlers can only be added before `start()`.
    #[error("Processor already started")]
    AlreadyStarted,

    /// The endpoint string could not be parsed.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// The processor has been stopped.
    #[error("Processor stopped")]
    Stopped,
}

impl From<RegistryError> for ProcessorError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::ConflictingPrefix {
                family,
                version,
                prefix,
            } => Self::ConflictingPrefix {
                family,
                version,
                prefix,
            },
            RegistryError::InvalidDescriptor(reason) => Self::InvalidDescriptor(reason),
        }
    }
}

/// Endpoint parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("Unsupported endpoint scheme in {0:?} (expected tcp://host:port)")]
    UnsupportedScheme(String),

    #[error("Missing host in endpoint {0:?}")]
    MissingHost(String),

    #[error("Missing or invalid port in endpoint {0:?}")]
    InvalidPort(String),
}

/// Errors raised by transport adapters.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("Connect error: {0}")]
    Connect(String),

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame-level violation (e.g. oversize frame).
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A frame body could not be decoded. Framing is still in sync.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// The peer went away.
    #[error("Connection closed")]
    Closed,
}

/// Errors seen by users of a [`TransportChannel`](crate::channel::TransportChannel).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Outbound envelope could not be framed; the connection is unaffected.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Outbound queue at capacity (`try_send` only).
    #[error("Outbound queue full")]
    Full,
}

/// Correlation table protocol anomalies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("Correlation {0} is already outstanding")]
    DuplicateCorrelation(CorrelationId),

    #[error("Unknown correlation {0}")]
    UnknownCorrelation(CorrelationId),

    #[error("Correlation {0} already settled")]
    AlreadySettled(CorrelationId),

    /// The table no longer accepts registrations.
    #[error("Correlation table closed: {0}")]
    Closed(WaitError),
}

impl CorrelationError {
    /// Metric label for this anomaly.
    pub fn label(&self) -> &'static str {
        match self {
            Self::DuplicateCorrelation(_) => "duplicate_correlation",
            Self::UnknownCorrelation(_) => "unknown_correlation",
            Self::AlreadySettled(_) => "already_settled",
            Self::Closed(_) => "table_closed",
        }
    }
}

/// Why a correlated wait ended without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("Timed out waiting for reply")]
    Timeout,

    #[error("Channel lost")]
    ChannelLost,

    #[error("Processor shutting down")]
    ShuttingDown,
}

/// Errors surfaced to handlers by the context proxy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// Address outside the handler's namespaces, or refused by the validator.
    #[error("Authorization denied for address {0}")]
    AuthorizationDenied(String),

    #[error("State call timed out")]
    Timeout,

    #[error("Channel lost during state call")]
    ChannelLost,

    #[error("Processor shutting down")]
    ShuttingDown,

    /// The validator answered with something we cannot interpret.
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The validator refused an event or receipt.
    #[error("Validator rejected request: {0}")]
    Rejected(String),

    /// The request could not be encoded (e.g. exceeds the frame limit).
    #[error("Request encoding failed: {0}")]
    Encoding(String),
}

impl ContextError {
    /// Metric label for this error.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AuthorizationDenied(_) => "authorization_denied",
            Self::Timeout => "timeout",
            Self::ChannelLost => "channel_lost",
            Self::ShuttingDown => "shutting_down",
            Self::UnexpectedReply(_) => "unexpected_reply",
            Self::Rejected(_) => "rejected",
            Self::Encoding(_) => "encoding",
        }
    }
}

impl From<WaitError> for ContextError {
    fn from(error: WaitError) -> Self {
        match error {
            WaitError::Timeout => Self::Timeout,
            WaitError::ChannelLost => Self::ChannelLost,
            WaitError::ShuttingDown => Self::ShuttingDown,
        }
    }
}

impl From<ChannelError> for ContextError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Closed | ChannelError::Full => Self::ChannelLost,
            ChannelError::Malformed(reason) => Self::UnexpectedReply(reason),
            ChannelError::Encode(reason) => Self::Encoding(reason),
        }
    }
}

/// Handler outcome other than success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// The transaction is invalid; the validator rejects it.
    #[error("Invalid transaction: {message}")]
    InvalidTransaction {
        message: String,
        extended_data: Vec<u8>,
    },

    /// The handler could not reach a verdict; the validator may retry.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ApplyError {
    /// Invalid transaction without extended data.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidTransaction {
            message: message.into(),
            extended_data: Vec::new(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }
}

impl From<ContextError> for ApplyError {
    fn from(error: ContextError) -> Self {
        Self::InternalError(error.to_string())
    }
}

/// Handler registry configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Conflicting prefix {prefix} for {family} {version}")]
    ConflictingPrefix {
        family: String,
        version: String,
        prefix: String,
    },

    #[error("Invalid handler descriptor: {0}")]
    InvalidDescriptor(String),
}

/// No registered handler matches an execution request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No handler for {family} {version} in namespaces {prefixes:?}")]
pub struct NoMatch {
    pub family: String,
    pub version: String,
    pub prefixes: Vec<String>,
}
