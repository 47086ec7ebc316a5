//! Integer-key transaction family.
//!
//! Payloads are JSON objects `{"Verb": "set"|"inc"|"dec", "Name": ..., "Value": ...}`.
//! Each name lives at `prefix + sha512(name)[-64..]`; the address holds a JSON
//! map of name → value so colliding names share one entry.

use async_trait::async_trait;
use qc_18_transaction_processor::{
    ApplyError, HandlerDescriptor, StateContext, TransactionHandler,
};
use serde::{Deserialize, Serialize};
use shared_crypto::make_address;
use shared_types::TpProcessRequest;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

pub const FAMILY_NAME: &str = "intkey";
pub const FAMILY_VERSION: &str = "1.0";
pub const MAX_NAME_LEN: usize = 20;
pub const MAX_VALUE: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Set,
    Inc,
    Dec,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Set => "set",
            Self::Inc => "inc",
            Self::Dec => "dec",
        })
    }
}

/// Reasons a payload is rejected before touching state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Invalid payload serialization: {0}")]
    Malformed(String),

    #[error("Name must be 1 to {MAX_NAME_LEN} characters, got {0}")]
    InvalidName(usize),

    #[error("Value must be between 0 and {MAX_VALUE}, got {0}")]
    ValueOutOfRange(u64),
}

/// One decoded intkey transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntkeyPayload {
    #[serde(rename = "Verb")]
    pub verb: Verb,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: u64,
}

impl IntkeyPayload {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        let payload: Self =
            serde_json::from_slice(bytes).map_err(|e| PayloadError::Malformed(e.to_string()))?;

        let name_len = payload.name.chars().count();
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return Err(PayloadError::InvalidName(name_len));
        }
        if payload.value > MAX_VALUE {
            return Err(PayloadError::ValueOutOfRange(payload.value));
        }
        Ok(payload)
    }
}

/// Handler for the `intkey` family under one namespace prefix.
pub struct IntkeyHandler {
    descriptor: HandlerDescriptor,
    prefix: String,
}

impl IntkeyHandler {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            descriptor: HandlerDescriptor::new(FAMILY_NAME, [FAMILY_VERSION], [prefix.clone()]),
            prefix,
        }
    }

    pub fn address(&self, name: &str) -> Result<String, ApplyError> {
        make_address(&self.prefix, name).map_err(|e| ApplyError::internal(e.to_string()))
    }
}

/// Apply `payload` to the current value of its name.
fn next_value(payload: &IntkeyPayload, current: Option<u64>) -> Result<u64, ApplyError> {
    let name = &payload.name;
    match (payload.verb, current) {
        (Verb::Set, Some(_)) => Err(ApplyError::invalid(format!(
            "Verb is set but Name already in state, Name: {name}"
        ))),
        (Verb::Set, None) => Ok(payload.value),
        (Verb::Inc | Verb::Dec, None) => Err(ApplyError::invalid(format!(
            "Verb is {} but Name is not in state, Name: {name}",
            payload.verb
        ))),
        (Verb::Inc, Some(current)) => current
            .checked_add(payload.value)
            .filter(|v| *v <= MAX_VALUE)
            .ok_or_else(|| {
                ApplyError::invalid(format!(
                    "Verb is inc but result would be greater than {MAX_VALUE}"
                ))
            }),
        (Verb::Dec, Some(current)) => current.checked_sub(payload.value).ok_or_else(|| {
            ApplyError::invalid("Verb is dec but result would be less than 0")
        }),
    }
}

#[async_trait]
impl TransactionHandler for IntkeyHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn apply(
        &self,
        request: &TpProcessRequest,
        context: &dyn StateContext,
    ) -> Result<(), ApplyError> {
        let payload = IntkeyPayload::from_bytes(&request.payload)
            .map_err(|e| ApplyError::invalid(e.to_string()))?;
        let address = self.address(&payload.name)?;

        let mut state = context.get_state(std::slice::from_ref(&address)).await?;
        let mut entries: BTreeMap<String, u64> = match state.remove(&address).flatten() {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ApplyError::internal(format!("Failed to decode state at {address}: {e}"))
            })?,
            None => BTreeMap::new(),
        };

        let updated = next_value(&payload, entries.get(&payload.name).copied())?;
        debug!(verb = %payload.verb, name = %payload.name, value = updated, "Applying intkey");
        entries.insert(payload.name, updated);

        let encoded =
            serde_json::to_vec(&entries).map_err(|e| ApplyError::internal(e.to_string()))?;
        let written = context
            .set_state(BTreeMap::from([(address.clone(), encoded)]))
            .await?;
        if !written.contains(&address) {
            return Err(ApplyError::internal(format!(
                "State write not acknowledged for {address}"
            )));
        }
        Ok(())
    }
}
