//! Execution verdicts and their wire replies.

use shared_types::{ProcessStatus, TpProcessResponse};

use super::errors::{ApplyError, NoMatch};

/// Outcome of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid {
        message: String,
        extended_data: Vec<u8>,
    },
    InternalError {
        message: String,
    },
}

impl Verdict {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn status(&self) -> ProcessStatus {
        match self {
            Self::Valid => ProcessStatus::Ok,
            Self::Invalid { .. } => ProcessStatus::InvalidTransaction,
            Self::InternalError { .. } => ProcessStatus::InternalError,
        }
    }

    /// Metric label
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Valid => "ok",
            Self::Invalid { .. } => "invalid",
            Self::InternalError { .. } => "internal_error",
        }
    }

    pub fn into_response(self) -> TpProcessResponse {
        let status = self.status();
        let (message, extended_data) = match self {
            Self::Valid => (String::new(), Vec::new()),
            Self::Invalid {
                message,
                extended_data,
            } => (message, extended_data),
            Self::InternalError { message } => (message, Vec::new()),
        };
        TpProcessResponse {
            status,
            message,
            extended_data,
        }
    }
}

impl From<Result<(), ApplyError>> for Verdict {
    fn from(result: Result<(), ApplyError>) -> Self {
        match result {
            Ok(()) => Self::Valid,
            Err(ApplyError::InvalidTransaction {
                message,
                extended_data,
            }) => Self::Invalid {
                message,
                extended_data,
            },
            Err(ApplyError::InternalError(message)) => Self::InternalError { message },
        }
    }
}

/// Reply for a request no handler claims.
pub fn unhandled_response(no_match: &NoMatch) -> TpProcessResponse {
    TpProcessResponse {
        status: ProcessStatus::Unhandled,
        message: no_match.to_string(),
        extended_data: Vec::new(),
    }
}
