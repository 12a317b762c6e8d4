//! API key protocol
//!
//! The key is supplied out of band; authenticating just packages it.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{AuthProtocol, AuthenticationContext};
use crate::credentials::AuthCredentials;
use crate::transport::OutgoingRequest;
use crate::types::{API_KEY_HEADER, API_KEY_PROTOCOL};
use crate::{AuthError, Result};

const KEY_FIELD: &str = "api_key";

/// Sends a static key in the `X-API-Key` header
#[derive(Debug, Clone)]
pub struct ApiKeyProtocol {
    key: Option<SecretString>,
}

impl ApiKeyProtocol {
    /// Protocol with a key to present
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Some(SecretString::new(key.into())),
        }
    }

    /// Protocol that can use stored keys but cannot produce one
    pub fn without_key() -> Self {
        Self { key: None }
    }

    /// Credentials for a key
    pub fn credentials(key: &str) -> AuthCredentials {
        AuthCredentials::new(API_KEY_PROTOCOL).with_field(KEY_FIELD, key)
    }
}

#[async_trait]
impl AuthProtocol for ApiKeyProtocol {
    fn protocol_id(&self) -> &str {
        API_KEY_PROTOCOL
    }

    async fn authenticate(&self, _context: &AuthenticationContext<'_>) -> Result<AuthCredentials> {
        match &self.key {
            Some(key) => Ok(Self::credentials(key.expose_secret())),
            None => Err(AuthError::denied("no API key configured")),
        }
    }

    fn prepare_request(
        &self,
        request: &mut OutgoingRequest,
        credentials: &AuthCredentials,
    ) -> Result<()> {
        let key = credentials
            .field(KEY_FIELD)
            .ok_or_else(|| AuthError::invalid_token("api_key credentials carry no key"))?;
        request.set_header(API_KEY_HEADER, key)
    }

    fn validate_credentials(&self, credentials: &AuthCredentials) -> bool {
        credentials.protocol_id == API_KEY_PROTOCOL
            && credentials.field(KEY_FIELD).is_some_and(|key| !key.is_empty())
            && !credentials.is_expired()
    }
}
