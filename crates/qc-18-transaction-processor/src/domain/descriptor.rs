//! Handler descriptor: which family, versions and namespaces a handler serves.

use shared_crypto::is_namespace_prefix;
use std::collections::HashSet;

use super::errors::RegistryError;

/// Static description of a transaction handler.
///
/// Read-only once the handler is added to a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDescriptor {
    /// Transaction family name
    pub family_name: String,
    /// Supported versions, in announcement order
    pub family_versions: Vec<String>,
    /// Namespace prefixes (6 lowercase hex chars each)
    pub namespaces: Vec<String>,
}

impl HandlerDescriptor {
    pub fn new<V, N>(family_name: impl Into<String>, versions: V, namespaces: N) -> Self
    where
        V: IntoIterator,
        V::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
    {
        Self {
            family_name: family_name.into(),
            family_versions: versions.into_iter().map(Into::into).collect(),
            namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }

    /// Check the descriptor is well formed.
    ///
    /// # Errors
    ///
    /// `InvalidDescriptor` if the family name is empty, there are no
    /// versions, a version is empty or repeated, there are no namespaces,
    /// or a namespace is not a valid prefix or is repeated.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: String| Err(RegistryError::InvalidDescriptor(reason));

        if self.family_name.trim().is_empty() {
            return invalid("family name is empty".to_string());
        }
        if self.family_versions.is_empty() {
            return invalid(format!("{}: no versions", self.family_name));
        }

        let mut seen = HashSet::new();
        for version in &self.family_versions {
            if version.is_empty() {
                return invalid(format!("{}: empty version", self.family_name));
            }
            if !seen.insert(version.as_str()) {
                return invalid(format!("{}: duplicate version {version}", self.family_name));
            }
        }

        if self.namespaces.is_empty() {
            return invalid(format!("{}: no namespaces", self.family_name));
        }

        let mut seen = HashSet::new();
        for namespace in &self.namespaces {
            if !is_namespace_prefix(namespace) {
                return invalid(format!(
                    "{}: namespace {namespace:?} is not 6 lowercase hex chars",
                    self.family_name
                ));
            }
            if !seen.insert(namespace.as_str()) {
                return invalid(format!(
                    "{}: duplicate namespace {namespace}",
                    self.family_name
                ));
            }
        }

        Ok(())
    }

    /// Whether `address` falls inside one of this handler's namespaces.
    pub fn covers(&self, address: &str) -> bool {
        self.namespaces.iter().any(|ns| address.starts_with(ns.as_str()))
    }
}
