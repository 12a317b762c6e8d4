//! Credential representations
//!
//! [`AuthCredentials`] is the protocol-neutral shape every protocol produces.
//! [`OAuthToken`] is the OAuth-only shape older stores hold. [`StoredCredentials`]
//! is the single tagged union the store persists, and converts to either.

use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::types::OAUTH2_PROTOCOL;
use crate::{AuthError, Result};

const ACCESS_TOKEN: &str = "access_token";
const TOKEN_TYPE: &str = "token_type";
const REFRESH_TOKEN: &str = "refresh_token";
const SCOPE: &str = "scope";

/// Protocol-tagged credential material
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthCredentials {
    /// Protocol that produced (and can use) these credentials
    pub protocol_id: String,
    /// Opaque protocol-specific fields
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Expiry, if the credential has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthCredentials {
    /// Empty credentials for a protocol
    pub fn new(protocol_id: impl Into<String>) -> Self {
        Self {
            protocol_id: protocol_id.into(),
            payload: serde_json::Map::new(),
            expires_at: None,
        }
    }

    /// Set a string field
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload
            .insert(name.into(), serde_json::Value::String(value.into()));
        self
    }

    /// Set the expiry
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// String field by name
    pub fn field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(serde_json::Value::as_str)
    }

    /// The access token, for token-based protocols
    pub fn access_token(&self) -> Option<&str> {
        self.field(ACCESS_TOKEN)
    }

    /// Whether the token was issued bound to a key (`token_type` of `DPoP`)
    pub fn is_dpop_bound(&self) -> bool {
        self.field(TOKEN_TYPE)
            .is_some_and(|token_type| token_type.eq_ignore_ascii_case("dpop"))
    }

    /// Whether the credential has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether the credential has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("protocol_id", &self.protocol_id)
            .field("payload", &self.payload.keys().collect::<Vec<_>>())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// OAuth 2.1 token set
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// Access token
    pub access_token: String,
    /// `Bearer` or `DPoP`
    pub token_type: String,
    /// Refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl OAuthToken {
    /// Bearer token without expiry
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_at: None,
            scope: None,
        }
    }

    /// Whether the token is DPoP-bound
    pub fn is_dpop(&self) -> bool {
        self.token_type.eq_ignore_ascii_case("dpop")
    }

    /// Whether the token has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

impl From<OAuthToken> for AuthCredentials {
    fn from(token: OAuthToken) -> Self {
        let mut credentials = AuthCredentials::new(OAUTH2_PROTOCOL)
            .with_field(ACCESS_TOKEN, token.access_token)
            .with_field(TOKEN_TYPE, token.token_type);
        if let Some(refresh_token) = token.refresh_token {
            credentials = credentials.with_field(REFRESH_TOKEN, refresh_token);
        }
        if let Some(scope) = token.scope {
            credentials = credentials.with_field(SCOPE, scope);
        }
        credentials.expires_at = token.expires_at;
        credentials
    }
}

impl TryFrom<&AuthCredentials> for OAuthToken {
    type Error = AuthError;

    fn try_from(credentials: &AuthCredentials) -> Result<Self> {
        if credentials.protocol_id != OAUTH2_PROTOCOL {
            return Err(AuthError::UnsupportedProtocol {
                protocol_id: credentials.protocol_id.clone(),
            });
        }
        let access_token = credentials
            .access_token()
            .ok_or_else(|| AuthError::invalid_token("oauth2 credentials carry no access_token"))?;

        Ok(Self {
            access_token: access_token.to_string(),
            token_type: credentials.field(TOKEN_TYPE).unwrap_or("Bearer").to_string(),
            refresh_token: credentials.field(REFRESH_TOKEN).map(str::to_string),
            expires_at: credentials.expires_at,
            scope: credentials.field(SCOPE).map(str::to_string),
        })
    }
}

impl TryFrom<AuthCredentials> for OAuthToken {
    type Error = AuthError;

    fn try_from(credentials: AuthCredentials) -> Result<Self> {
        Self::try_from(&credentials)
    }
}

/// What a credential store persists
///
/// Either shape converts to [`AuthCredentials`]; only `oauth2` entries convert back to
/// [`OAuthToken`], and that conversion keeps every token field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredCredentials {
    /// OAuth token set
    #[serde(rename = "oauth")]
    OAuth(OAuthToken),
    /// Any protocol's credentials
    Protocol(AuthCredentials),
}

impl StoredCredentials {
    /// Protocol the entry belongs to
    pub fn protocol_id(&self) -> &str {
        match self {
            Self::OAuth(_) => OAUTH2_PROTOCOL,
            Self::Protocol(credentials) => &credentials.protocol_id,
        }
    }

    /// As protocol-neutral credentials
    pub fn to_auth_credentials(&self) -> AuthCredentials {
        match self {
            Self::OAuth(token) => AuthCredentials::from(token.clone()),
            Self::Protocol(credentials) => credentials.clone(),
        }
    }

    /// As an OAuth token, when the entry is OAuth
    pub fn to_oauth_token(&self) -> Option<OAuthToken> {
        match self {
            Self::OAuth(token) => Some(token.clone()),
            Self::Protocol(credentials) => OAuthToken::try_from(credentials).ok(),
        }
    }
}

impl From<OAuthToken> for StoredCredentials {
    fn from(token: OAuthToken) -> Self {
        Self::OAuth(token)
    }
}

impl From<AuthCredentials> for StoredCredentials {
    fn from(credentials: AuthCredentials) -> Self {
        Self::Protocol(credentials)
    }
}

/// A client registered with an authorization server
#[derive(Clone)]
pub struct ClientInfo {
    /// Issued client id
    pub client_id: String,
    /// Issued client secret, for confidential clients
    pub client_secret: Option<SecretString>,
    /// Token endpoint auth method agreed at registration
    pub token_endpoint_auth_method: Option<String>,
    /// Secret expiry, if the server set one
    pub client_secret_expires_at: Option<DateTime<Utc>>,
}

impl ClientInfo {
    /// Public client with only an id
    pub fn public(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            token_endpoint_auth_method: None,
            client_secret_expires_at: None,
        }
    }

    /// Secret as text, if any
    pub fn secret(&self) -> Option<&str> {
        self.client_secret
            .as_ref()
            .map(|secret| secret.expose_secret().as_str())
    }

    /// Whether the registration is still usable at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.client_secret_expires_at
            .is_none_or(|expires_at| expires_at > now)
    }
}

impl fmt::Debug for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientInfo")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("token_endpoint_auth_method", &self.token_endpoint_auth_method)
            .field("client_secret_expires_at", &self.client_secret_expires_at)
            .finish()
    }
}
