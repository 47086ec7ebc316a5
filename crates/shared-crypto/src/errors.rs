//! Crypto error types.

use thiserror::Error;

/// Hashing and address derivation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Namespace prefix is not 6 lowercase hex chars
    #[error("Invalid namespace prefix: {0:?}")]
    InvalidPrefix(String),
}
