//! Token introspection (RFC 7662)
//!
//! [`OAuthTokenVerifier`](super::OAuthTokenVerifier) resolves opaque access tokens
//! through a [`TokenIntrospector`]: either a remote introspection endpoint or a static
//! table for tests and single-process deployments.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::oauth2::token::describe_failure;
use crate::transport::{HttpTransport, OutgoingRequest, ReqwestTransport, send_with_timeout};
use crate::{AuthError, Result};

/// Proof-of-possession confirmation (`cnf`, RFC 7800 / RFC 9449)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// JWK SHA-256 thumbprint of the key the token is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jkt: Option<String>,
}

/// Introspection result per RFC 7662 Section 2.2
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is currently active
    pub active: bool,
    /// Space-separated scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Client the token was issued to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Resource owner's username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// `Bearer` or `DPoP`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Expiry, seconds since the epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued at, seconds since the epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audience
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Key binding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cnf: Option<Confirmation>,
    /// Other members
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl IntrospectionResponse {
    /// Active token for a subject
    pub fn active(subject: impl Into<String>) -> Self {
        Self {
            active: true,
            sub: Some(subject.into()),
            ..Self::default()
        }
    }

    /// Set the scopes
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Bind to a DPoP key thumbprint
    #[must_use]
    pub fn with_jkt(mut self, jkt: impl Into<String>) -> Self {
        self.cnf = Some(Confirmation {
            jkt: Some(jkt.into()),
        });
        self.token_type = Some("DPoP".to_string());
        self
    }

    /// Set the expiry
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.exp = Some(expires_at.timestamp());
        self
    }

    /// Scopes as a list
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Thumbprint the token is bound to
    pub fn bound_thumbprint(&self) -> Option<&str> {
        self.cnf.as_ref().and_then(|c| c.jkt.as_deref())
    }

    /// Expiry as a timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }
}

/// Resolves an access token to its state
#[async_trait]
pub trait TokenIntrospector: Send + Sync + fmt::Debug {
    /// Look a token up; unknown tokens are inactive, not errors
    ///
    /// # Errors
    /// Returns error when the token's state cannot be determined
    async fn introspect(&self, token: &str) -> Result<IntrospectionResponse>;
}

/// In-memory token table
#[derive(Default)]
pub struct StaticIntrospector {
    tokens: DashMap<String, IntrospectionResponse>,
}

impl StaticIntrospector {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert)
    #[must_use]
    pub fn with_token(self, token: impl Into<String>, response: IntrospectionResponse) -> Self {
        self.insert(token, response);
        self
    }

    /// Register a token
    pub fn insert(&self, token: impl Into<String>, response: IntrospectionResponse) {
        self.tokens.insert(token.into(), response);
    }

    /// Forget a token; later lookups report it inactive
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }
}

impl fmt::Debug for StaticIntrospector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticIntrospector")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

#[async_trait]
impl TokenIntrospector for StaticIntrospector {
    async fn introspect(&self, token: &str) -> Result<IntrospectionResponse> {
        Ok(self
            .tokens
            .get(token)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

/// Client for a remote introspection endpoint
#[derive(Clone)]
pub struct IntrospectionClient {
    endpoint: Url,
    client_id: String,
    client_secret: Option<SecretString>,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl IntrospectionClient {
    /// Client authenticating to `endpoint` with `client_id` (and secret, if confidential)
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        endpoint: Url,
        client_id: impl Into<String>,
        client_secret: Option<String>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(10);
        Ok(Self {
            endpoint,
            client_id: client_id.into(),
            client_secret: client_secret.map(SecretString::new),
            transport: Arc::new(ReqwestTransport::new(timeout)?),
            timeout,
        })
    }

    /// Send through another transport
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Per-request time limit
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for IntrospectionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntrospectionClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenIntrospector for IntrospectionClient {
    async fn introspect(&self, token: &str) -> Result<IntrospectionResponse> {
        let mut form = vec![
            ("token", token),
            ("token_type_hint", "access_token"),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose_secret().as_str()));
        }
        let request = OutgoingRequest::post_form(self.endpoint.clone(), form);

        let response = send_with_timeout(self.transport.as_ref(), request, self.timeout).await?;
        debug!(endpoint = %self.endpoint, status = %response.status, "token introspection");
        if !response.is_success() {
            return Err(AuthError::transport(format!(
                "introspection endpoint failed: {}",
                describe_failure(&response)
            )));
        }
        response.json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_response_parses_cnf() {
        let response: IntrospectionResponse = serde_json::from_str(
            r#"{"active": true, "sub": "alice", "scope": "read write",
                "token_type": "DPoP", "exp": 1419356238,
                "cnf": {"jkt": "0ZcOCORZNYy-DWpqq30jZyJGHTN0d2HglBV3uiguA4I"}}"#,
        )
        .unwrap();
        assert!(response.active);
        assert_eq!(response.scopes(), vec!["read", "write"]);
        assert_eq!(
            response.bound_thumbprint(),
            Some("0ZcOCORZNYy-DWpqq30jZyJGHTN0d2HglBV3uiguA4I")
        );
        assert_eq!(response.expires_at().unwrap().timestamp(), 1419356238);
    }

    #[tokio::test]
    async fn test_static_introspector() {
        let introspector =
            StaticIntrospector::new().with_token("at", IntrospectionResponse::active("alice"));
        assert!(introspector.introspect("at").await.unwrap().active);
        assert!(!introspector.introspect("unknown").await.unwrap().active);

        assert!(introspector.revoke("at"));
        assert!(!introspector.introspect("at").await.unwrap().active);
    }

    #[test]
    fn test_client_debug_redacts_secret() {
        let client = IntrospectionClient::new(
            Url::parse("https://auth.example.com/introspect").unwrap(),
            "rs",
            Some("hunter2".into()),
        )
        .unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }
}
