//! Outbound ports: framed transport to a validator.

use async_trait::async_trait;
use shared_types::RequestEnvelope;

use crate::domain::{Endpoint, TransportError};

/// Write and read halves of one established connection.
pub type TransportPair = (Box<dyn FrameWriter>, Box<dyn FrameReader>);

/// Establishes connections to a validator.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportPair, TransportError>;
}

/// Sending half. Owned by exactly one writer task.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Write one complete frame.
    ///
    /// `TransportError::Codec` means nothing was written and the connection
    /// is still usable. Any other error is fatal to the connection.
    async fn write_frame(&mut self, envelope: &RequestEnvelope) -> Result<(), TransportError>;

    /// Flush and close the sending direction.
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}

/// Receiving half. Owned by exactly one reader task.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Read the next frame. `Ok(None)` is a clean end of stream.
    ///
    /// `TransportError::Malformed` means the body could not be decoded but
    /// framing is intact; any other error is fatal to the connection.
    async fn read_frame(&mut self) -> Result<Option<RequestEnvelope>, TransportError>;
}
