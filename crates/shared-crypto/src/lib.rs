//! # Shared Crypto - Namespace Hashing
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `hashing` | SHA-512 | Namespace prefixes, state addresses |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod hashing;

// Re-exports
pub use errors::CryptoError;
pub use hashing::{
    is_address, is_namespace_prefix, make_address, namespace_prefix, sha512_hex, ADDRESS_LEN,
    NAMESPACE_PREFIX_LEN,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
