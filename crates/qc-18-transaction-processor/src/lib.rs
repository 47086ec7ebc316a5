//! # Transaction Processor Runtime
//!
//! Owns one persistent connection to a validator, registers every handler's
//! (family, version, namespaces), and serves execution requests multiplexed
//! over that connection. Handlers read and write state through a per-request
//! [`ContextProxy`] whose calls travel back over the same connection.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! INIT ──► CONNECTING ──► REGISTERING ──► SERVING ──► DRAINING ──► STOPPED
//!              ▲                             │
//!              └──────── DISCONNECTED ◄──────┘   (reconnect = true)
//! ```
//!
//! ## Guarantees
//!
//! | Property | Enforcement |
//! |----------|-------------|
//! | Exactly one reply per execution request | `dispatch.rs` - `execute()` |
//! | Correlation ids settle exactly once | `correlation.rs` - `settle()` |
//! | No interleaved frames | `channel.rs` - single writer task |
//! | Ordered state calls per execution | `context.rs` - `sequencer` mutex |
//! | Atomic handler registration | `registry.rs` - `register()` |
//! | No waiter suspended past channel loss | `dispatch.rs` - `run()` closes the table |
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  adapters/tcp.rs    - length-prefixed frames over TcpStream     │
//! │  adapters/memory.rs - in-process validator pair                 │
//! │  service.rs         - TransactionProcessor (lifecycle)          │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  ports/inbound.rs  - TransactionHandler, StateContext           │
//! │  ports/outbound.rs - Connector, FrameWriter, FrameReader        │
//! │  channel, correlation, registry, context, dispatch, tracker     │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/state.rs      - ConnectionState, ConnectionStateCell    │
//! │  domain/descriptor.rs - HandlerDescriptor                       │
//! │  domain/verdict.rs    - Verdict                                 │
//! │  domain/errors.rs     - error taxonomy                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let processor = TransactionProcessor::new("tcp://localhost:40000", ProcessorConfig::default())?;
//! processor.add_handler(IntkeyHandler::new())?;
//! processor.start().await?;
//! // ...
//! processor.stop().await;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod channel;
pub mod config;
pub mod context;
pub mod correlation;
pub mod dispatch;
pub mod domain;
pub mod ports;
pub mod registry;
pub mod service;
pub mod tracker;

pub use channel::{ChannelOptions, TransportChannel};
pub use config::{ConfigError, ProcessorConfig};
pub use context::ContextProxy;
pub use correlation::{CorrelationTable, Waiter};
pub use domain::*;
pub use ports::*;
pub use registry::HandlerRegistry;
pub use service::{Termination, TransactionProcessor};
