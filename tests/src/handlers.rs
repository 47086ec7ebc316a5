//! Test handlers.
//!
//! [`ScriptHandler`] runs the steps encoded in its payload, so one handler
//! covers state access, events, receipts, invalid transactions and panics.

use async_trait::async_trait;
use qc_18_transaction_processor::{
    ApplyError, ContextError, HandlerDescriptor, StateContext, TransactionHandler,
};
use serde::{Deserialize, Serialize};
use shared_crypto::{make_address, namespace_prefix};
use shared_types::TpProcessRequest;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::validator::process_request;

pub const SCRIPT_FAMILY: &str = "script";
pub const SCRIPT_VERSION: &str = "1.0";

/// One handler action. Addresses are full 70-character addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Step {
    Get(String),
    Set(String, Vec<u8>),
    Delete(String),
    Event(String),
    Receipt(Vec<u8>),
    Invalid(String),
    /// Sleep without touching the context, in milliseconds
    Sleep(u64),
    Panic,
}

pub struct ScriptHandler {
    descriptor: HandlerDescriptor,
    errors: Option<mpsc::UnboundedSender<ContextError>>,
}

impl ScriptHandler {
    pub fn new() -> Self {
        Self::with_versions([SCRIPT_VERSION])
    }

    pub fn with_versions<const N: usize>(versions: [&str; N]) -> Self {
        Self {
            descriptor: HandlerDescriptor::new(SCRIPT_FAMILY, versions, [Self::prefix()]),
            errors: None,
        }
    }

    /// Report every context error the handler sees to `errors`.
    pub fn reporting(mut self, errors: mpsc::UnboundedSender<ContextError>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn prefix() -> String {
        namespace_prefix(SCRIPT_FAMILY)
    }

    pub fn address(name: &str) -> String {
        make_address(&Self::prefix(), name).expect("valid namespace prefix")
    }

    /// Execution request running `steps`.
    pub fn request(context_id: &str, steps: &[Step]) -> TpProcessRequest {
        let payload = serde_json::to_vec(steps).expect("encode steps");
        process_request(
            SCRIPT_FAMILY,
            SCRIPT_VERSION,
            vec![Self::address("input")],
            payload,
            context_id,
        )
    }

    fn report(&self, error: ContextError) -> ApplyError {
        if let Some(errors) = &self.errors {
            let _ = errors.send(error.clone());
        }
        error.into()
    }
}

impl Default for ScriptHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionHandler for ScriptHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn apply(
        &self,
        request: &TpProcessRequest,
        context: &dyn StateContext,
    ) -> Result<(), ApplyError> {
        let steps: Vec<Step> = serde_json::from_slice(&request.payload)
            .map_err(|e| ApplyError::invalid(e.to_string()))?;

        for step in steps {
            match step {
                Step::Get(address) => {
                    context
                        .get_state(&[address])
                        .await
                        .map_err(|e| self.report(e))?;
                }
                Step::Set(address, data) => {
                    context
                        .set_state(BTreeMap::from([(address, data)]))
                        .await
                        .map_err(|e| self.report(e))?;
                }
                Step::Delete(address) => {
                    context
                        .delete_state(&[address])
                        .await
                        .map_err(|e| self.report(e))?;
                }
                Step::Event(event_type) => {
                    context
                        .add_event(&event_type, Vec::new(), Vec::new())
                        .await
                        .map_err(|e| self.report(e))?;
                }
                Step::Receipt(data) => {
                    context
                        .add_receipt_data(data)
                        .await
                        .map_err(|e| self.report(e))?;
                }
                Step::Invalid(message) => return Err(ApplyError::invalid(message)),
                Step::Sleep(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                Step::Panic => panic!("scripted panic"),
            }
        }
        Ok(())
    }
}
