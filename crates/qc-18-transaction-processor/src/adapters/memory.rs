//! In-process transport.
//!
//! [`memory_transport`] returns a connector for the processor and a
//! [`MemoryValidator`] that accepts each connection as a [`MemoryPeer`].
//! Frames travel as encoded bodies, so both sides go through the same codec
//! as the TCP transport. Connect failures can be injected with
//! [`MemoryConnector::fail_next`].

use async_trait::async_trait;
use shared_types::codec::{check_frame_len, decode_body, encode_body};
use shared_types::RequestEnvelope;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::domain::{Endpoint, TransportError};
use crate::ports::{Connector, FrameReader, FrameWriter, TransportPair};

#[derive(Debug)]
struct ConnectorState {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    injected_failures: AtomicU32,
    attempts: AtomicU32,
    max_frame_len: usize,
}

/// Processor side of the in-process transport.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    state: Arc<ConnectorState>,
}

impl MemoryConnector {
    /// Make the next `count` connect attempts fail.
    pub fn fail_next(&self, count: u32) {
        self.state.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Connect attempts made so far, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.state.attempts.load(Ordering::SeqCst)
    }
}

/// Validator side of the in-process transport.
#[derive(Debug)]
pub struct MemoryValidator {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryValidator {
    /// Wait for the next processor connection. `None` once every connector
    /// is gone.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// Create a connected connector/validator pair.
pub fn memory_transport(max_frame_len: usize) -> (MemoryConnector, MemoryValidator) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let connector = MemoryConnector {
        state: Arc::new(ConnectorState {
            accept_tx,
            injected_failures: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            max_frame_len,
        }),
    };
    (connector, MemoryValidator { accept_rx })
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportPair, TransportError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .state
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::Connect(format!(
                "{endpoint}: connection refused (injected)"
            )));
        }

        let (to_validator_tx, to_validator_rx) = mpsc::unbounded_channel();
        let (to_processor_tx, to_processor_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            tx: to_processor_tx,
            rx: to_validator_rx,
        };
        self.state
            .accept_tx
            .send(peer)
            .map_err(|_| TransportError::Connect(format!("{endpoint}: validator not listening")))?;

        let max_frame_len = self.state.max_frame_len;
        Ok((
            Box::new(MemoryFrameWriter {
                tx: Some(to_validator_tx),
                max_frame_len,
            }),
            Box::new(MemoryFrameReader {
                rx: to_processor_rx,
                max_frame_len,
            }),
        ))
    }
}

struct MemoryFrameWriter {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    max_frame_len: usize,
}

#[async_trait]
impl FrameWriter for MemoryFrameWriter {
    async fn write_frame(&mut self, envelope: &RequestEnvelope) -> Result<(), TransportError> {
        let body = encode_body(envelope, self.max_frame_len)?;
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(body).map_err(|_| TransportError::Closed)
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

struct MemoryFrameReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    max_frame_len: usize,
}

#[async_trait]
impl FrameReader for MemoryFrameReader {
    async fn read_frame(&mut self) -> Result<Option<RequestEnvelope>, TransportError> {
        let Some(body) = self.rx.recv().await else {
            return Ok(None);
        };
        check_frame_len(body.len(), self.max_frame_len)?;
        decode_body(&body)
            .map(Some)
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

/// One accepted processor connection, seen from the validator.
///
/// Dropping the peer closes the connection.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryPeer {
    /// Send an envelope to the processor. Returns `false` if it is gone.
    pub fn send(&self, envelope: &RequestEnvelope) -> bool {
        match bincode_body(envelope) {
            Some(body) => self.tx.send(body).is_ok(),
            None => false,
        }
    }

    /// Send raw body bytes, e.g. a frame that will not decode.
    pub fn send_raw(&self, body: Vec<u8>) -> bool {
        self.tx.send(body).is_ok()
    }

    /// Next envelope from the processor. `None` once it closed the
    /// connection. Bodies that do not decode are skipped.
    pub async fn recv(&mut self) -> Option<RequestEnvelope> {
        loop {
            let body = self.rx.recv().await?;
            match decode_body(&body) {
                Ok(envelope) => return Some(envelope),
                Err(e) => tracing::warn!(error = %e, "Dropping undecodable frame from processor"),
            }
        }
    }

    /// A sender usable from another task while this peer is receiving.
    pub fn sender(&self) -> MemoryPeerSender {
        MemoryPeerSender {
            tx: self.tx.clone(),
        }
    }
}

/// Cloneable sending handle for a [`MemoryPeer`].
#[derive(Debug, Clone)]
pub struct MemoryPeerSender {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl MemoryPeerSender {
    pub fn send(&self, envelope: &RequestEnvelope) -> bool {
        match bincode_body(envelope) {
            Some(body) => self.tx.send(body).is_ok(),
            None => false,
        }
    }
}

fn bincode_body(envelope: &RequestEnvelope) -> Option<Vec<u8>> {
    encode_body(envelope, usize::MAX).ok()
}
