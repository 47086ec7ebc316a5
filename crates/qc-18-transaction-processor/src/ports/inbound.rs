//! Inbound ports: the handler abstraction.

use async_trait::async_trait;
use shared_types::TpProcessRequest;
use std::collections::BTreeMap;

use crate::domain::{ApplyError, ContextError, HandlerDescriptor};

/// Application logic for one transaction family.
///
/// The runtime never inspects handler internals; it dispatches on
/// [`descriptor`](Self::descriptor) and reports whatever `apply` returns.
#[async_trait]
pub trait TransactionHandler: Send + Sync + 'static {
    /// Family, versions and namespaces this handler serves.
    fn descriptor(&self) -> &HandlerDescriptor;

    /// Execute one transaction.
    ///
    /// `Ok(())` accepts the transaction. State is only reachable through
    /// `context`.
    async fn apply(
        &self,
        request: &TpProcessRequest,
        context: &dyn StateContext,
    ) -> Result<(), ApplyError>;
}

/// State access available to a handler during one execution.
///
/// Calls are answered in the order they are made.
#[async_trait]
pub trait StateContext: Send + Sync {
    /// Read addresses. Unset addresses map to `None`.
    async fn get_state(
        &self,
        addresses: &[String],
    ) -> Result<BTreeMap<String, Option<Vec<u8>>>, ContextError>;

    /// Write entries, returning the addresses the validator accepted.
    async fn set_state(
        &self,
        entries: BTreeMap<String, Vec<u8>>,
    ) -> Result<Vec<String>, ContextError>;

    /// Delete addresses, returning the addresses that were deleted.
    async fn delete_state(&self, addresses: &[String]) -> Result<Vec<String>, ContextError>;

    /// Attach an application event to the transaction receipt.
    async fn add_event(
        &self,
        event_type: &str,
        attributes: Vec<(String, String)>,
        data: Vec<u8>,
    ) -> Result<(), ContextError>;

    /// Attach opaque data to the transaction receipt.
    async fn add_receipt_data(&self, data: Vec<u8>) -> Result<(), ContextError>;
}
