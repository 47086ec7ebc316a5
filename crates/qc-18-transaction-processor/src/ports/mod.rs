//! Ports: the traits at the runtime's two seams.
//!
//! - `inbound`: what application handlers implement and what they are given
//! - `outbound`: how the runtime reaches a validator

pub mod inbound;
pub mod outbound;

pub use inbound::{StateContext, TransactionHandler};
pub use outbound::{Connector, FrameReader, FrameWriter, TransportPair};
