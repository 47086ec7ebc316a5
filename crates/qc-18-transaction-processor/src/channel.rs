//! Transport Channel - one framed connection to a validator.
//!
//! ```text
//!   send() ──► outbound queue ──► writer task ──► FrameWriter
//!                (ack per frame)
//!
//!   FrameReader ──► reader task ──► inbound queue ──► receive()
//! ```
//!
//! The writer task is the only code that touches the sending half, so frames
//! from concurrent senders never interleave. The reader task is the only
//! reader. Unexpected closure (EOF, I/O error, oversize frame) invokes the
//! failure callback once and wakes every waiter with `Closed`; `close()` is
//! the intentional path and does not.

use shared_types::RequestEnvelope;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, warn};

use crate::domain::{ChannelError, TransportError};
use crate::ports::{FrameReader, FrameWriter};

/// Called once when the channel closes unexpectedly, with the reason.
pub type FailureCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Default depth of the outbound and inbound queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Options for [`TransportChannel::open`].
#[derive(Clone)]
pub struct ChannelOptions {
    pub queue_depth: usize,
    /// Peer description for logs
    pub label: String,
    pub on_failure: Option<FailureCallback>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            label: "validator".to_string(),
            on_failure: None,
        }
    }
}

struct Outbound {
    envelope: RequestEnvelope,
    ack: oneshot::Sender<Result<(), ChannelError>>,
}

type Inbound = Result<RequestEnvelope, ChannelError>;

struct Shared {
    closed: watch::Sender<bool>,
    label: String,
    on_failure: Option<FailureCallback>,
}

impl Shared {
    /// Mark the channel closed. Returns `true` for the first caller only.
    fn shut(&self, failure: Option<&str>) -> bool {
        let first = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if !first {
            return false;
        }

        match failure {
            Some(reason) => {
                warn!(peer = %self.label, reason, "Channel closed unexpectedly");
                if let Some(callback) = &self.on_failure {
                    callback(reason);
                }
            }
            None => debug!(peer = %self.label, "Channel closed"),
        }
        true
    }

    async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so this cannot fail while we are here.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// A message-framed, bidirectional connection to one validator.
pub struct TransportChannel {
    outbound: mpsc::Sender<Outbound>,
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    shared: Arc<Shared>,
}

impl TransportChannel {
    /// Take ownership of a connected writer/reader pair and start the writer
    /// and reader tasks. Must be called inside a tokio runtime.
    pub fn open(
        writer: Box<dyn FrameWriter>,
        reader: Box<dyn FrameReader>,
        options: ChannelOptions,
    ) -> Self {
        let depth = options.queue_depth.max(1);
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            closed,
            label: options.label,
            on_failure: options.on_failure,
        });

        let (outbound_tx, outbound_rx) = mpsc::channel(depth);
        let (inbound_tx, inbound_rx) = mpsc::channel(depth);

        tokio::spawn(writer_task(writer, outbound_rx, shared.clone()));
        tokio::spawn(reader_task(reader, inbound_tx, shared.clone()));

        Self {
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            shared,
        }
    }

    /// Queue an envelope and wait until it has been written.
    ///
    /// # Errors
    ///
    /// - `Closed` if the channel is (or becomes) closed before the write
    /// - `Encode` if the envelope cannot be framed; the channel stays open
    pub async fn send(&self, envelope: RequestEnvelope) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let (ack, ack_rx) = oneshot::channel();
        self.outbound
            .send(Outbound { envelope, ack })
            .await
            .map_err(|_| ChannelError::Closed)?;

        ack_rx.await.unwrap_or(Err(ChannelError::Closed))
    }

    /// Queue an envelope without waiting for queue space or for the write.
    ///
    /// # Errors
    ///
    /// - `Closed` if the channel is closed
    /// - `Full` if the outbound queue is at capacity
    pub fn try_send(&self, envelope: RequestEnvelope) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        // Nobody waits on the ack; the writer ignores a dropped receiver.
        let (ack, _) = oneshot::channel();
        self.outbound
            .try_send(Outbound { envelope, ack })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ChannelError::Full,
                mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
            })
    }

    /// Next inbound envelope, in arrival order.
    ///
    /// Frames that arrived before closure are still delivered; after that
    /// every call returns `Closed`.
    pub async fn receive(&self) -> Result<RequestEnvelope, ChannelError> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(item) => item,
            None => Err(ChannelError::Closed),
        }
    }

    /// Close the channel on purpose. Synchronous and idempotent; does not
    /// invoke the failure callback.
    pub fn close(&self) {
        self.shared.shut(None);
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Wait until the channel is closed for any reason.
    pub async fn closed(&self) {
        self.shared.wait_closed().await;
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.shared.shut(None);
    }
}

async fn writer_task(
    mut writer: Box<dyn FrameWriter>,
    mut outbound: mpsc::Receiver<Outbound>,
    shared: Arc<Shared>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.wait_closed() => break,
            next = outbound.recv() => next,
        };
        let Some(Outbound { envelope, ack }) = next else {
            break;
        };

        let result = tokio::select! {
            biased;
            _ = shared.wait_closed() => {
                let _ = ack.send(Err(ChannelError::Closed));
                break;
            }
            result = writer.write_frame(&envelope) => result,
        };

        match result {
            Ok(()) => {
                let _ = ack.send(Ok(()));
            }
            Err(TransportError::Codec(e)) => {
                warn!(
                    peer = %shared.label,
                    correlation_id = %envelope.correlation_id,
                    error = %e,
                    "Outbound frame rejected"
                );
                let _ = ack.send(Err(ChannelError::Encode(e.to_string())));
            }
            Err(e) => {
                let _ = ack.send(Err(ChannelError::Closed));
                shared.shut(Some(&format!("write failed: {e}")));
                break;
            }
        }
    }

    // Queued senders observe `Closed` when their acks are dropped here.
    outbound.close();
    if let Err(e) = writer.shutdown().await {
        debug!(peer = %shared.label, error = %e, "Writer shutdown failed");
    }
}

async fn reader_task(
    mut reader: Box<dyn FrameReader>,
    inbound: mpsc::Sender<Inbound>,
    shared: Arc<Shared>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.wait_closed() => break,
            frame = reader.read_frame() => frame,
        };

        let item = match frame {
            Ok(Some(envelope)) => Ok(envelope),
            Ok(None) => {
                shared.shut(Some("connection closed by peer"));
                break;
            }
            Err(TransportError::Malformed(reason)) => Err(ChannelError::Malformed(reason)),
            Err(e) => {
                shared.shut(Some(&format!("read failed: {e}")));
                break;
            }
        };

        let delivered = tokio::select! {
            biased;
            _ = shared.wait_closed() => false,
            sent = inbound.send(item) => sent.is_ok(),
        };
        if !delivered {
            break;
        }
    }
}
