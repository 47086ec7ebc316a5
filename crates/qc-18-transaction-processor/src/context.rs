//! Context Proxy - a handler's only path to validator state.
//!
//! One proxy exists per execution. Each call:
//! 1. checks addresses against the handler's namespaces (no round trip on
//!    failure)
//! 2. registers a fresh correlation id
//! 3. sends the request, tagged with the execution's `context_id`
//! 4. waits for the matching reply, bounded by the state timeout
//!
//! Calls are serialized: the next request is not sent until the previous
//! reply has been consumed, even if the handler issues them concurrently.

use async_trait::async_trait;
use quantum_telemetry::TP_STATE_CALLS;
use shared_types::{
    AddStatus, CorrelationId, Event, ProtocolMessage, RequestEnvelope, StateStatus,
    TpEventAddRequest, TpEventAddResponse, TpReceiptAddDataRequest, TpReceiptAddDataResponse,
    TpStateDeleteRequest, TpStateDeleteResponse, TpStateEntry, TpStateGetRequest,
    TpStateGetResponse, TpStateSetRequest, TpStateSetResponse,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::channel::TransportChannel;
use crate::correlation::CorrelationTable;
use crate::domain::{ContextError, CorrelationError};
use crate::ports::StateContext;

/// Per-execution facade over the transport channel.
pub struct ContextProxy {
    context_id: String,
    execution_id: CorrelationId,
    namespaces: Vec<String>,
    channel: Arc<TransportChannel>,
    correlations: CorrelationTable,
    timeout: Duration,
    sequencer: Mutex<()>,
}

impl ContextProxy {
    pub fn new(
        context_id: impl Into<String>,
        execution_id: CorrelationId,
        namespaces: Vec<String>,
        channel: Arc<TransportChannel>,
        correlations: CorrelationTable,
        timeout: Duration,
    ) -> Self {
        Self {
            context_id: context_id.into(),
            execution_id,
            namespaces,
            channel,
            correlations,
            timeout,
            sequencer: Mutex::new(()),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    fn authorize<'a, I>(&self, addresses: I) -> Result<(), ContextError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for address in addresses {
            if !self
                .namespaces
                .iter()
                .any(|ns| address.starts_with(ns.as_str()))
            {
                return Err(ContextError::AuthorizationDenied(address.clone()));
            }
        }
        Ok(())
    }

    /// One serialized request/reply exchange, recorded in metrics.
    async fn round_trip<Req, Resp>(
        &self,
        operation: &'static str,
        request: &Req,
    ) -> Result<Resp, ContextError>
    where
        Req: ProtocolMessage + Sync,
        Resp: ProtocolMessage,
    {
        let _turn = self.sequencer.lock().await;
        let result = self.exchange(request).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        TP_STATE_CALLS.with_label_values(&[operation, outcome]).inc();
        result
    }

    async fn exchange<Req, Resp>(&self, request: &Req) -> Result<Resp, ContextError>
    where
        Req: ProtocolMessage + Sync,
        Resp: ProtocolMessage,
    {
        let envelope =
            RequestEnvelope::request(request).map_err(|e| ContextError::Encoding(e.to_string()))?;
        let id = envelope.correlation_id;

        let waiter = self
            .correlations
            .register(id, Resp::KIND)
            .map_err(|e| match e {
                CorrelationError::Closed(reason) => ContextError::from(reason),
                other => ContextError::UnexpectedReply(other.to_string()),
            })?;

        debug!(
            execution_id = %self.execution_id,
            correlation_id = %id,
            kind = ?Req::KIND,
            "State request"
        );
        self.channel.send(envelope).await?;

        let reply = waiter.wait(self.timeout).await?;
        reply
            .decode::<Resp>()
            .map_err(|e| ContextError::UnexpectedReply(e.to_string()))
    }
}

#[async_trait]
impl StateContext for ContextProxy {
    async fn get_state(
        &self,
        addresses: &[String],
    ) -> Result<BTreeMap<String, Option<Vec<u8>>>, ContextError> {
        if addresses.is_empty() {
            return Ok(BTreeMap::new());
        }
        self.authorize(addresses)?;

        let response: TpStateGetResponse = self
            .round_trip(
                "get",
                &TpStateGetRequest {
                    context_id: self.context_id.clone(),
                    addresses: addresses.to_vec(),
                },
            )
            .await?;

        if response.status == StateStatus::AuthorizationError {
            return Err(ContextError::AuthorizationDenied(addresses.join(",")));
        }

        let mut values: BTreeMap<String, Option<Vec<u8>>> =
            addresses.iter().map(|a| (a.clone(), None)).collect();
        for TpStateEntry { address, data } in response.entries {
            if let Some(slot) = values.get_mut(&address) {
                *slot = (!data.is_empty()).then_some(data);
            }
        }
        Ok(values)
    }

    async fn set_state(
        &self,
        entries: BTreeMap<String, Vec<u8>>,
    ) -> Result<Vec<String>, ContextError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        self.authorize(entries.keys())?;

        let response: TpStateSetResponse = self
            .round_trip(
                "set",
                &TpStateSetRequest {
                    context_id: self.context_id.clone(),
                    entries: entries
                        .into_iter()
                        .map(|(address, data)| TpStateEntry { address, data })
                        .collect(),
                },
            )
            .await?;

        match response.status {
            StateStatus::Ok => Ok(response.addresses),
            StateStatus::AuthorizationError => Err(ContextError::AuthorizationDenied(
                response.addresses.join(","),
            )),
        }
    }

    async fn delete_state(&self, addresses: &[String]) -> Result<Vec<String>, ContextError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        self.authorize(addresses)?;

        let response: TpStateDeleteResponse = self
            .round_trip(
                "delete",
                &TpStateDeleteRequest {
                    context_id: self.context_id.clone(),
                    addresses: addresses.to_vec(),
                },
            )
            .await?;

        match response.status {
            StateStatus::Ok => Ok(response.addresses),
            StateStatus::AuthorizationError => {
                Err(ContextError::AuthorizationDenied(addresses.join(",")))
            }
        }
    }

    async fn add_event(
        &self,
        event_type: &str,
        attributes: Vec<(String, String)>,
        data: Vec<u8>,
    ) -> Result<(), ContextError> {
        let response: TpEventAddResponse = self
            .round_trip(
                "event",
                &TpEventAddRequest {
                    context_id: self.context_id.clone(),
                    event: Event {
                        event_type: event_type.to_string(),
                        attributes,
                        data,
                    },
                },
            )
            .await?;

        match response.status {
            AddStatus::Ok => Ok(()),
            AddStatus::Error => Err(ContextError::Rejected(format!("event {event_type}"))),
        }
    }

    async fn add_receipt_data(&self, data: Vec<u8>) -> Result<(), ContextError> {
        let response: TpReceiptAddDataResponse = self
            .round_trip(
                "receipt",
                &TpReceiptAddDataRequest {
                    context_id: self.context_id.clone(),
                    data,
                },
            )
            .await?;

        match response.status {
            AddStatus::Ok => Ok(()),
            AddStatus::Error => Err(ContextError::Rejected("receipt data".to_string())),
        }
    }
}
