//! Domain layer: pure types with no I/O.

pub mod backoff;
pub mod descriptor;
pub mod endpoint;
pub mod errors;
pub mod execution;
pub mod state;
pub mod verdict;

pub use backoff::RetryPolicy;
pub use descriptor::HandlerDescriptor;
pub use endpoint::Endpoint;
pub use errors::*;
pub use execution::{ExecutionContext, ExecutionPhase};
pub use state::{ConnectionState, ConnectionStateCell, InvalidTransition};
pub use verdict::{unhandled_response, Verdict};
