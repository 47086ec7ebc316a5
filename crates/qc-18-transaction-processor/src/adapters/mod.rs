//! Transport adapters implementing [`Connector`](crate::ports::Connector).
//!
//! - `tcp`: production transport
//! - `memory`: in-process transport for embedding and tests

pub mod memory;
pub mod tcp;

pub use memory::{memory_transport, MemoryConnector, MemoryPeer, MemoryPeerSender, MemoryValidator};
pub use tcp::TcpConnector;
