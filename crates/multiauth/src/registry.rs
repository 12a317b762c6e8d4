//! Protocol registry and selection
//!
//! A registry is built once at startup and shared by reference. Registration order is
//! kept for metadata listings; selection is a pure function of the registration table
//! and its arguments.

use std::sync::Arc;

use tracing::debug;

use crate::protocols::AuthProtocol;
use crate::types::{AuthProtocolMetadata, ProtocolPreferences};
use crate::{AuthError, Result};

/// Protocol implementations by id
#[derive(Debug, Default, Clone)]
pub struct ProtocolRegistry {
    protocols: Vec<Arc<dyn AuthProtocol>>,
}

impl ProtocolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a protocol
    ///
    /// # Errors
    /// Returns [`AuthError::DuplicateProtocol`] if the id is already registered
    pub fn register(&mut self, protocol: Arc<dyn AuthProtocol>) -> Result<()> {
        if self.contains(protocol.protocol_id()) {
            return Err(AuthError::DuplicateProtocol {
                protocol_id: protocol.protocol_id().to_string(),
            });
        }
        debug!(protocol = protocol.protocol_id(), "registered auth protocol");
        self.protocols.push(protocol);
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    ///
    /// # Errors
    /// Returns [`AuthError::DuplicateProtocol`] if the id is already registered
    pub fn with(mut self, protocol: Arc<dyn AuthProtocol>) -> Result<Self> {
        self.register(protocol)?;
        Ok(self)
    }

    /// Protocol by id
    pub fn get(&self, protocol_id: &str) -> Option<Arc<dyn AuthProtocol>> {
        self.protocols
            .iter()
            .find(|p| p.protocol_id() == protocol_id)
            .cloned()
    }

    /// Whether an id is registered
    pub fn contains(&self, protocol_id: &str) -> bool {
        self.protocols.iter().any(|p| p.protocol_id() == protocol_id)
    }

    /// Registered ids in registration order
    pub fn protocol_ids(&self) -> Vec<&str> {
        self.protocols.iter().map(|p| p.protocol_id()).collect()
    }

    /// Discovery metadata for every registered protocol
    pub fn metadata(&self) -> Vec<AuthProtocolMetadata> {
        self.protocols.iter().map(|p| p.metadata()).collect()
    }

    /// Number of registered protocols
    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }

    /// Pick one protocol from `candidates`
    ///
    /// 1. Keep candidates that are registered (first occurrence, candidate order).
    /// 2. `default_id` wins if it survived.
    /// 3. Otherwise the lowest preference wins; unranked ids come last and ties keep
    ///    candidate order.
    ///
    /// # Errors
    /// Returns [`AuthError::NoMutualProtocol`] when no candidate is registered
    pub fn select<S: AsRef<str>>(
        &self,
        candidates: &[S],
        default_id: Option<&str>,
        preferences: &ProtocolPreferences,
    ) -> Result<String> {
        let mut mutual: Vec<&str> = Vec::with_capacity(candidates.len());
        for candidate in candidates.iter().map(AsRef::as_ref) {
            if self.contains(candidate) && !mutual.contains(&candidate) {
                mutual.push(candidate);
            }
        }

        if mutual.is_empty() {
            return Err(AuthError::NoMutualProtocol {
                candidates: candidates.iter().map(|c| c.as_ref().to_string()).collect(),
            });
        }

        if let Some(default_id) = default_id
            && mutual.contains(&default_id)
        {
            return Ok(default_id.to_string());
        }

        // sort_by_key is stable
        mutual.sort_by_key(|id| match preferences.get(id) {
            Some(priority) => (0, priority),
            None => (1, 0),
        });
        Ok(mutual[0].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{ApiKeyProtocol, MutualTlsProtocol};

    fn registry() -> ProtocolRegistry {
        ProtocolRegistry::new()
            .with(Arc::new(ApiKeyProtocol::without_key()))
            .unwrap()
            .with(Arc::new(MutualTlsProtocol::new()))
            .unwrap()
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        let err = registry
            .register(Arc::new(ApiKeyProtocol::new("k")))
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateProtocol { .. }));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_no_mutual_default_falls_to_intersection() {
        let selected = registry()
            .select(
                &["oauth2", "api_key"],
                Some("oauth2"),
                &ProtocolPreferences::new(),
            )
            .unwrap();
        assert_eq!(selected, "api_key");
    }

    #[test]
    fn test_default_beats_preferences() {
        let prefs = ProtocolPreferences::new().with("mutual_tls", 0).with("api_key", 9);
        let selected = registry()
            .select(&["mutual_tls", "api_key"], Some("api_key"), &prefs)
            .unwrap();
        assert_eq!(selected, "api_key");
    }

    #[test]
    fn test_preferences_then_candidate_order() {
        let registry = registry();
        let prefs = ProtocolPreferences::new().with("mutual_tls", 1);
        assert_eq!(
            registry
                .select(&["api_key", "mutual_tls"], None, &prefs)
                .unwrap(),
            "mutual_tls"
        );
        // no preferences: first candidate wins
        assert_eq!(
            registry
                .select(&["mutual_tls", "api_key"], None, &ProtocolPreferences::new())
                .unwrap(),
            "mutual_tls"
        );
    }

    #[test]
    fn test_empty_intersection() {
        let err = registry()
            .select(&["oauth2"], None, &ProtocolPreferences::new())
            .unwrap_err();
        match err {
            AuthError::NoMutualProtocol { candidates } => assert_eq!(candidates, vec!["oauth2"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_metadata_in_registration_order() {
        let ids: Vec<_> = registry()
            .metadata()
            .into_iter()
            .map(|m| m.protocol_id)
            .collect();
        assert_eq!(ids, vec!["api_key", "mutual_tls"]);
    }
}
