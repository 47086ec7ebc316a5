//! Dispatch Engine - routes inbound frames for one session.
//!
//! ```text
//!   channel.receive() ──┬── TpProcessRequest ──► tracker.spawn(execute)
//!                       ├── PingRequest      ──► PingResponse
//!                       ├── reply kinds      ──► correlations.resolve()
//!                       └── anything else    ──► anomaly
//! ```
//!
//! The loop never blocks on a handler. Each execution runs on its own task
//! and sends exactly one `TpProcessResponse`.

use futures::FutureExt;
use quantum_telemetry::{record_anomaly, TP_EXECUTIONS, TP_EXECUTION_DURATION};
use shared_types::{
    MessageKind, PingRequest, PingResponse, ProtocolMessage, RequestEnvelope, TpProcessRequest,
    TpProcessResponse,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::channel::TransportChannel;
use crate::context::ContextProxy;
use crate::correlation::CorrelationTable;
use crate::domain::{
    unhandled_response, ChannelError, ConnectionState, ConnectionStateCell, ExecutionContext,
    ExecutionPhase, Verdict, WaitError,
};
use crate::registry::HandlerRegistry;
use crate::tracker::ExecutionTracker;

/// Everything an execution task needs, cloned per request.
#[derive(Clone)]
pub struct DispatchEngine {
    channel: Arc<TransportChannel>,
    correlations: CorrelationTable,
    registry: Arc<HandlerRegistry>,
    tracker: ExecutionTracker,
    state: ConnectionStateCell,
    state_timeout: Duration,
}

impl DispatchEngine {
    pub fn new(
        channel: Arc<TransportChannel>,
        correlations: CorrelationTable,
        registry: Arc<HandlerRegistry>,
        tracker: ExecutionTracker,
        state: ConnectionStateCell,
        state_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            correlations,
            registry,
            tracker,
            state,
            state_timeout,
        }
    }

    /// Receive and route frames until the channel closes. On exit every
    /// outstanding correlation has been released with `ChannelLost`.
    pub async fn run(self) {
        debug!(peer = %self.channel.label(), "Dispatch loop started");
        loop {
            match self.channel.receive().await {
                Ok(envelope) => self.route(envelope),
                Err(ChannelError::Malformed(reason)) => {
                    warn!(reason = %reason, "Dropping malformed frame");
                    record_anomaly("malformed");
                }
                Err(ChannelError::Closed | ChannelError::Encode(_) | ChannelError::Full) => break,
            }
        }

        let released = self.correlations.close(WaitError::ChannelLost);
        debug!(released, "Dispatch loop stopped");
    }

    fn route(&self, envelope: RequestEnvelope) {
        match envelope.message_kind {
            MessageKind::TpProcessRequest => {
                if matches!(
                    self.state.current(),
                    ConnectionState::Draining | ConnectionState::Stopped
                ) {
                    let refusal = Verdict::internal("processor shutting down").into_response();
                    self.post_reply(&envelope, &refusal);
                    return;
                }
                let engine = self.clone();
                self.tracker.spawn(async move { engine.execute(envelope).await });
            }
            MessageKind::PingRequest => {
                if envelope.decode::<PingRequest>().is_err() {
                    record_anomaly("malformed");
                }
                self.post_reply(&envelope, &PingResponse {});
            }
            kind if kind.is_reply() => {
                let id = envelope.correlation_id;
                if let Err(e) = self.correlations.resolve(id, envelope) {
                    warn!(correlation_id = %id, kind = ?kind, error = %e, "Unmatched reply");
                    record_anomaly(e.label());
                }
            }
            kind => {
                warn!(correlation_id = %envelope.correlation_id, kind = ?kind, "Unexpected message kind");
                record_anomaly("unexpected_kind");
            }
        }
    }

    /// Run one execution request to its single reply.
    async fn execute(self, envelope: RequestEnvelope) {
        let request = match envelope.decode::<TpProcessRequest>() {
            Ok(request) => request,
            Err(e) => {
                warn!(correlation_id = %envelope.correlation_id, error = %e, "Undecodable execution request");
                record_anomaly("malformed");
                let response = Verdict::internal(format!("undecodable request: {e}")).into_response();
                self.reply(&envelope, &response).await;
                return;
            }
        };

        let mut ctx = ExecutionContext::new(envelope.correlation_id, request.context_id.clone());
        let family = request.header.family_name.clone();

        let handler = match self.registry.handler_for(&request.header) {
            Ok(handler) => handler,
            Err(no_match) => {
                info!(
                    correlation_id = %ctx.correlation_id,
                    family = %no_match.family,
                    version = %no_match.version,
                    "No handler for request"
                );
                TP_EXECUTIONS
                    .with_label_values(&[family.as_str(), "unhandled"])
                    .inc();
                if self.reply(&envelope, &unhandled_response(&no_match)).await {
                    ctx.advance(ExecutionPhase::Replied);
                }
                return;
            }
        };

        ctx.family = Some(family.clone());
        ctx.advance(ExecutionPhase::Dispatched);

        let proxy = ContextProxy::new(
            request.context_id.clone(),
            ctx.correlation_id,
            handler.descriptor().namespaces.clone(),
            self.channel.clone(),
            self.correlations.clone(),
            self.state_timeout,
        );

        let timer = TP_EXECUTION_DURATION
            .with_label_values(&[family.as_str()])
            .start_timer();
        let outcome = AssertUnwindSafe(handler.apply(&request, &proxy))
            .catch_unwind()
            .await;
        timer.observe_duration();
        drop(proxy);

        let verdict = match outcome {
            Ok(result) => Verdict::from(result),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    correlation_id = %ctx.correlation_id,
                    family = %family,
                    panic = %message,
                    "Handler panicked"
                );
                Verdict::internal(format!("handler panicked: {message}"))
            }
        };
        ctx.advance(ExecutionPhase::Completed);

        TP_EXECUTIONS
            .with_label_values(&[family.as_str(), verdict.outcome()])
            .inc();
        debug!(
            correlation_id = %ctx.correlation_id,
            context_id = %ctx.context_id,
            outcome = verdict.outcome(),
            elapsed_secs = ctx.elapsed_secs(),
            "Execution finished"
        );

        if self.reply(&envelope, &verdict.into_response()).await {
            ctx.advance(ExecutionPhase::Replied);
        }
    }

    /// Queue a reply from the reader loop without waiting on the writer, so a
    /// backed-up connection cannot stall reply routing.
    fn post_reply<M: ProtocolMessage>(&self, request: &RequestEnvelope, message: &M) {
        let envelope = match RequestEnvelope::reply_to(request, message) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(correlation_id = %request.correlation_id, error = %e, "Failed to encode reply");
                return;
            }
        };
        match self.channel.try_send(envelope) {
            Ok(()) => {}
            Err(ChannelError::Full) => {
                warn!(correlation_id = %request.correlation_id, kind = ?M::KIND, "Outbound queue full, reply dropped");
                record_anomaly("outbound_full");
            }
            Err(e) => {
                warn!(correlation_id = %request.correlation_id, error = %e, "Reply lost");
            }
        }
    }

    /// Send a reply echoing `request`'s correlation id. Returns whether it
    /// was written.
    async fn reply<M: ProtocolMessage>(&self, request: &RequestEnvelope, message: &M) -> bool {
        let envelope = match RequestEnvelope::reply_to(request, message) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(correlation_id = %request.correlation_id, error = %e, "Failed to encode reply");
                return false;
            }
        };

        match self.channel.send(envelope).await {
            Ok(()) => true,
            Err(ChannelError::Encode(reason)) if M::KIND == MessageKind::TpProcessResponse => {
                // Oversize verdict payload: report the failure instead.
                warn!(correlation_id = %request.correlation_id, reason = %reason, "Reply too large");
                let fallback: TpProcessResponse =
                    Verdict::internal(format!("reply rejected: {reason}")).into_response();
                match RequestEnvelope::reply_to(request, &fallback) {
                    Ok(envelope) => self.channel.send(envelope).await.is_ok(),
                    Err(_) => false,
                }
            }
            Err(e) => {
                warn!(correlation_id = %request.correlation_id, error = %e, "Reply lost");
                false
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
