//! # Intkey Transaction Processor
//!
//! Hosts the transaction processor runtime with the integer-key family:
//!
//! 1. Parse the endpoint and verbosity
//! 2. Configure logging (log config file, else a per-processor log file)
//! 3. Compute the `intkey` namespace prefix
//! 4. Register [`IntkeyHandler`] and run until interrupted
//!
//! The namespace prefix is the first six hex characters of
//! `sha512("intkey")`. A lookup in the validator's namespace registry could
//! replace it later.

pub mod cli;
pub mod handler;

pub use cli::{Args, DEFAULT_ENDPOINT, LOG_CONFIG_FILE};
pub use handler::{IntkeyHandler, IntkeyPayload, PayloadError, Verb, FAMILY_NAME, FAMILY_VERSION};
