//! Credential storage
//!
//! Stores are keyed by resource URL. Reads are concurrent; writes take the lock
//! exclusively, so a refresh never interleaves with another writer.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::Result;
use crate::credentials::{AuthCredentials, ClientInfo, StoredCredentials};

/// A stored credential and its state
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    /// The credentials
    pub credentials: StoredCredentials,
    /// Set when the resource rejected them; kept until re-authentication replaces them
    pub invalidated: bool,
    /// When the credentials were written
    pub stored_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Credentials worth attaching: not invalidated and not expired at `now`
    pub fn usable_at(&self, now: DateTime<Utc>) -> Option<AuthCredentials> {
        if self.invalidated {
            return None;
        }
        let credentials = self.credentials.to_auth_credentials();
        (!credentials.is_expired_at(now)).then_some(credentials)
    }
}

/// Persistent credential storage
#[async_trait]
pub trait CredentialStore: Send + Sync + fmt::Debug {
    /// Current record for a resource
    async fn get_credentials(&self, resource: &str) -> Result<Option<CredentialRecord>>;

    /// Replace the credentials for a resource
    async fn store_credentials(&self, resource: &str, credentials: StoredCredentials)
    -> Result<()>;

    /// Mark a resource's credentials as rejected without deleting them
    async fn invalidate_credentials(&self, resource: &str) -> Result<()>;

    /// Client registered for an authorization server
    async fn get_client_info(&self, issuer: &str) -> Result<Option<ClientInfo>>;

    /// Remember a registered client
    async fn store_client_info(&self, issuer: &str, client: ClientInfo) -> Result<()>;

    /// Forget everything
    async fn clear(&self) -> Result<()>;
}

/// In-memory [`CredentialStore`]
#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<HashMap<String, CredentialRecord>>,
    clients: RwLock<HashMap<String, ClientInfo>>,
}

impl MemoryCredentialStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCredentialStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_credentials(&self, resource: &str) -> Result<Option<CredentialRecord>> {
        Ok(self.credentials.read().await.get(resource).cloned())
    }

    async fn store_credentials(
        &self,
        resource: &str,
        credentials: StoredCredentials,
    ) -> Result<()> {
        debug!(resource, protocol = credentials.protocol_id(), "storing credentials");
        self.credentials.write().await.insert(
            resource.to_string(),
            CredentialRecord {
                credentials,
                invalidated: false,
                stored_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn invalidate_credentials(&self, resource: &str) -> Result<()> {
        if let Some(record) = self.credentials.write().await.get_mut(resource) {
            debug!(resource, "invalidating credentials");
            record.invalidated = true;
        }
        Ok(())
    }

    async fn get_client_info(&self, issuer: &str) -> Result<Option<ClientInfo>> {
        Ok(self.clients.read().await.get(issuer).cloned())
    }

    async fn store_client_info(&self, issuer: &str, client: ClientInfo) -> Result<()> {
        debug!(issuer, client_id = %client.client_id, "storing registered client");
        self.clients.write().await.insert(issuer.to_string(), client);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.credentials.write().await.clear();
        self.clients.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::OAuthToken;

    const RESOURCE: &str = "https://api.example.com/mcp";

    #[tokio::test]
    async fn test_store_and_get() {
        let store = MemoryCredentialStore::new();
        assert!(store.get_credentials(RESOURCE).await.unwrap().is_none());

        store
            .store_credentials(RESOURCE, OAuthToken::bearer("at").into())
            .await
            .unwrap();
        let record = store.get_credentials(RESOURCE).await.unwrap().unwrap();
        assert!(!record.invalidated);
        assert_eq!(
            record.usable_at(Utc::now()).unwrap().access_token(),
            Some("at")
        );
    }

    #[tokio::test]
    async fn test_invalidate_keeps_record() {
        let store = MemoryCredentialStore::new();
        store
            .store_credentials(RESOURCE, OAuthToken::bearer("at").into())
            .await
            .unwrap();
        store.invalidate_credentials(RESOURCE).await.unwrap();

        let record = store.get_credentials(RESOURCE).await.unwrap().unwrap();
        assert!(record.invalidated);
        assert!(record.usable_at(Utc::now()).is_none());

        // a fresh write clears the flag
        store
            .store_credentials(RESOURCE, OAuthToken::bearer("at2").into())
            .await
            .unwrap();
        let record = store.get_credentials(RESOURCE).await.unwrap().unwrap();
        assert!(!record.invalidated);
    }

    #[tokio::test]
    async fn test_expired_credentials_not_usable() {
        let store = MemoryCredentialStore::new();
        let credentials = AuthCredentials::new("api_key")
            .with_field("api_key", "k")
            .with_expires_at(Utc::now() - chrono::Duration::seconds(5));
        store
            .store_credentials(RESOURCE, credentials.into())
            .await
            .unwrap();
        let record = store.get_credentials(RESOURCE).await.unwrap().unwrap();
        assert!(record.usable_at(Utc::now()).is_none());
    }

    #[tokio::test]
    async fn test_client_info_and_clear() {
        let store = MemoryCredentialStore::new();
        store
            .store_client_info("https://auth.example.com", ClientInfo::public("c-1"))
            .await
            .unwrap();
        assert_eq!(
            store
                .get_client_info("https://auth.example.com")
                .await
                .unwrap()
                .unwrap()
                .client_id,
            "c-1"
        );

        store.clear().await.unwrap();
        assert!(
            store
                .get_client_info("https://auth.example.com")
                .await
                .unwrap()
                .is_none()
        );
    }
}
