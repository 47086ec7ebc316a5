//! # Namespace Hashing
//!
//! SHA-512 derived namespace prefixes and state addresses.
//!
//! ## Address Layout
//!
//! ```text
//! ┌────────────────┬──────────────────────────────────────────────┐
//! │ prefix (6 hex) │ last 64 hex chars of sha512(key)             │
//! └────────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! The prefix is a stable function of the family name: the same name always
//! yields the same prefix. Looking prefixes up from a validator-side namespace
//! registry is anticipated but not implemented.

use sha2::{Digest, Sha512};

use crate::errors::CryptoError;

/// Length of a namespace prefix in hex characters.
pub const NAMESPACE_PREFIX_LEN: usize = 6;

/// Length of a full state address in hex characters.
pub const ADDRESS_LEN: usize = 70;

/// Hash data with SHA-512 and return the lowercase hex digest.
pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}

/// Namespace prefix for a transaction family: first 6 hex chars of
/// `sha512(family_name)`.
pub fn namespace_prefix(family_name: &str) -> String {
    let mut digest = sha512_hex(family_name.as_bytes());
    digest.truncate(NAMESPACE_PREFIX_LEN);
    digest
}

/// Whether `s` is a well-formed namespace prefix (6 lowercase hex chars).
pub fn is_namespace_prefix(s: &str) -> bool {
    s.len() == NAMESPACE_PREFIX_LEN && is_lower_hex(s)
}

/// Whether `s` is a well-formed state address (70 lowercase hex chars).
pub fn is_address(s: &str) -> bool {
    s.len() == ADDRESS_LEN && is_lower_hex(s)
}

/// Build the state address of `key` inside the namespace `prefix`.
pub fn make_address(prefix: &str, key: &str) -> Result<String, CryptoError> {
    if !is_namespace_prefix(prefix) {
        return Err(CryptoError::InvalidPrefix(prefix.to_string()));
    }

    let digest = sha512_hex(key.as_bytes());
    let suffix = &digest[digest.len() - (ADDRESS_LEN - NAMESPACE_PREFIX_LEN)..];
    Ok(format!("{prefix}{suffix}"))
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
