//! Dynamic Client Registration (RFC 7591)

use std::fmt;

use chrono::{TimeZone, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::config::{OAuth2ClientConfig, OAuth2GrantType};
use crate::credentials::ClientInfo;

/// Client metadata sent to the registration endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Redirect URIs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uris: Option<Vec<String>>,
    /// `client_secret_basic`, `client_secret_post` or `none`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
    /// Grant types the client will use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_types: Option<Vec<String>>,
    /// Response types the client will use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_types: Option<Vec<String>>,
    /// Human-readable name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// Space-separated scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl RegistrationRequest {
    /// Registration for a public client running `config`'s grant
    pub fn for_client(config: &OAuth2ClientConfig) -> Self {
        let (grant_types, response_types, redirect_uris) = match config.grant {
            OAuth2GrantType::AuthorizationCode => (
                vec!["authorization_code".to_string(), "refresh_token".to_string()],
                Some(vec!["code".to_string()]),
                Some(vec![config.redirect_uri.clone()]),
            ),
            OAuth2GrantType::ClientCredentials => {
                (vec!["client_credentials".to_string()], None, None)
            }
        };

        Self {
            redirect_uris,
            token_endpoint_auth_method: Some("none".to_string()),
            grant_types: Some(grant_types),
            response_types,
            client_name: Some(config.client_name.clone()),
            scope: (!config.scopes.is_empty()).then(|| config.scopes.join(" ")),
        }
    }
}

/// Registration endpoint response
#[derive(Clone, Deserialize)]
pub struct RegistrationResponse {
    /// Issued client id
    pub client_id: String,
    /// Issued secret, for confidential clients
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Seconds since epoch when the secret expires; 0 means never
    #[serde(default)]
    pub client_secret_expires_at: Option<i64>,
    /// Auth method the server settled on
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
}

impl fmt::Debug for RegistrationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationResponse")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("client_secret_expires_at", &self.client_secret_expires_at)
            .field("token_endpoint_auth_method", &self.token_endpoint_auth_method)
            .finish()
    }
}

impl From<RegistrationResponse> for ClientInfo {
    fn from(response: RegistrationResponse) -> Self {
        Self {
            client_id: response.client_id,
            client_secret: response.client_secret.map(SecretString::new),
            token_endpoint_auth_method: response.token_endpoint_auth_method,
            client_secret_expires_at: response
                .client_secret_expires_at
                .filter(|&secs| secs > 0)
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        }
    }
}
