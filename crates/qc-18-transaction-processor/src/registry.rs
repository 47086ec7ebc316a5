//! Handler Registry - (family, version, prefix) → handler.
//!
//! Built before `start()` and frozen behind an `Arc` afterwards, so dispatch
//! lookups are plain reads.

use shared_crypto::NAMESPACE_PREFIX_LEN;
use shared_types::TransactionHeader;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::{NoMatch, RegistryError};
use crate::ports::TransactionHandler;

type Key = (String, String, String);

/// One (family, version) announcement sent to the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub family: String,
    pub version: String,
    pub namespaces: Vec<String>,
}

/// Registered handlers, indexed by every (family, version, prefix) they claim.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn TransactionHandler>>,
    index: HashMap<Key, usize>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a batch. Any conflict fails the whole batch.
    pub fn from_handlers<I>(handlers: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Arc<dyn TransactionHandler>>,
    {
        let mut registry = Self::new();
        for handler in handlers {
            registry.register(handler)?;
        }
        Ok(registry)
    }

    /// Add a handler.
    ///
    /// # Errors
    ///
    /// - `InvalidDescriptor` if the descriptor fails validation
    /// - `ConflictingPrefix` if any of its tuples is already claimed; in that
    ///   case none of its tuples are added
    pub fn register(&mut self, handler: Arc<dyn TransactionHandler>) -> Result<(), RegistryError> {
        let descriptor = handler.descriptor();
        descriptor.validate()?;

        let keys: Vec<Key> = descriptor
            .family_versions
            .iter()
            .flat_map(|version| {
                descriptor.namespaces.iter().map(move |prefix| {
                    (
                        descriptor.family_name.clone(),
                        version.clone(),
                        prefix.clone(),
                    )
                })
            })
            .collect();

        if let Some((family, version, prefix)) = keys.iter().find(|k| self.index.contains_key(*k)) {
            return Err(RegistryError::ConflictingPrefix {
                family: family.clone(),
                version: version.clone(),
                prefix: prefix.clone(),
            });
        }

        let slot = self.handlers.len();
        tracing::debug!(
            family = %descriptor.family_name,
            versions = ?descriptor.family_versions,
            namespaces = ?descriptor.namespaces,
            "Handler registered"
        );
        self.index.extend(keys.into_iter().map(|key| (key, slot)));
        self.handlers.push(handler);
        Ok(())
    }

    /// Handler for an exact (family, version, prefix).
    pub fn lookup(
        &self,
        family: &str,
        version: &str,
        prefix: &str,
    ) -> Result<Arc<dyn TransactionHandler>, NoMatch> {
        let key = (family.to_string(), version.to_string(), prefix.to_string());
        self.index
            .get(&key)
            .map(|&slot| self.handlers[slot].clone())
            .ok_or_else(|| NoMatch {
                family: family.to_string(),
                version: version.to_string(),
                prefixes: vec![prefix.to_string()],
            })
    }

    /// Handler for an execution request. Candidates are the prefixes of the
    /// header's inputs, then its outputs; the first match wins.
    pub fn handler_for(
        &self,
        header: &TransactionHeader,
    ) -> Result<Arc<dyn TransactionHandler>, NoMatch> {
        let prefixes = candidate_prefixes(header);
        prefixes
            .iter()
            .find_map(|prefix| {
                self.lookup(&header.family_name, &header.family_version, prefix)
                    .ok()
            })
            .ok_or_else(|| NoMatch {
                family: header.family_name.clone(),
                version: header.family_version.clone(),
                prefixes,
            })
    }

    /// One registration per (family, version), in registration order.
    pub fn registrations(&self) -> Vec<Registration> {
        self.handlers
            .iter()
            .flat_map(|handler| {
                let descriptor = handler.descriptor();
                descriptor
                    .family_versions
                    .iter()
                    .map(move |version| Registration {
                        family: descriptor.family_name.clone(),
                        version: version.clone(),
                        namespaces: descriptor.namespaces.clone(),
                    })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.len())
            .field("tuples", &self.index.len())
            .finish()
    }
}

/// Distinct 6-char prefixes of the header's inputs then outputs, in order.
pub fn candidate_prefixes(header: &TransactionHeader) -> Vec<String> {
    let mut prefixes: Vec<String> = Vec::new();
    for address in header.inputs.iter().chain(&header.outputs) {
        let Some(prefix) = address.get(..NAMESPACE_PREFIX_LEN) else {
            continue;
        };
        if !prefixes.iter().any(|p| p == prefix) {
            prefixes.push(prefix.to_string());
        }
    }
    prefixes
}
