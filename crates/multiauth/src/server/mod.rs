//! Resource server side: verifier chain, verifiers and metadata routes
//!
//! A server builds one [`VerifierChain`] at startup and runs every inbound request
//! through it. Verifiers never see the request body; they work from the method, the
//! absolute URI (needed for DPoP `htu` checks) and the headers.

pub mod api_key;
pub mod chain;
pub mod introspection;
pub mod mutual_tls;
pub mod oauth;
pub mod routes;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::header::{AUTHORIZATION, HOST};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::challenge::{WwwAuthenticateBuilder, split_authorization};

pub use api_key::ApiKeyVerifier;
pub use chain::{UnauthorizedResponse, VerifierChain};
pub use introspection::{
    Confirmation, IntrospectionClient, IntrospectionResponse, StaticIntrospector,
    TokenIntrospector,
};
pub use mutual_tls::MutualTlsVerifier;
pub use oauth::OAuthTokenVerifier;
pub use routes::{
    MetadataRoute, MetadataRoutes, discovery_well_known_path, prm_well_known_path,
};

/// What a verifier sees of an inbound request
#[derive(Clone)]
pub struct InboundRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute request URI as the client addressed it
    pub uri: String,
    /// Request headers
    pub headers: HeaderMap,
}

impl InboundRequest {
    /// Request from parts
    pub fn new(method: Method, uri: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers,
        }
    }

    /// Request from `http` parts
    ///
    /// Servers usually see origin-form URIs (`/mcp?x=1`). The absolute URI is rebuilt
    /// from `public_origin` when given, otherwise from the `Host` header over https.
    pub fn from_http_parts(parts: &http::request::Parts, public_origin: Option<&str>) -> Self {
        let uri = if parts.uri.scheme().is_some() {
            parts.uri.to_string()
        } else {
            let path = parts
                .uri
                .path_and_query()
                .map_or("/", |pq| pq.as_str());
            match public_origin {
                Some(origin) => format!("{}{}", origin.trim_end_matches('/'), path),
                None => {
                    let host = parts
                        .headers
                        .get(HOST)
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("localhost");
                    format!("https://{host}{path}")
                }
            }
        };
        Self::new(parts.method.clone(), uri, parts.headers.clone())
    }

    /// Header value as text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `Authorization` split into scheme and credentials
    pub fn authorization(&self) -> Option<(&str, &str)> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(split_authorization)
    }
}

impl fmt::Debug for InboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// An authenticated caller
///
/// Inserted into request extensions by the tower middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Who the caller is
    pub subject: String,
    /// Protocol that authenticated the request
    pub protocol_id: String,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// OAuth client the token was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Token expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Thumbprint of the DPoP key the request proved possession of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpop_thumbprint: Option<String>,
}

impl AccessToken {
    /// Token for a subject
    pub fn new(subject: impl Into<String>, protocol_id: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            protocol_id: protocol_id.into(),
            scopes: Vec::new(),
            client_id: None,
            expires_at: None,
            dpop_thumbprint: None,
        }
    }

    /// Whether `scope` was granted
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// One inbound authentication scheme
#[async_trait]
pub trait TokenVerifier: Send + Sync + fmt::Debug {
    /// Protocol this verifier accepts
    fn protocol_id(&self) -> &str;

    /// Authenticate a request
    ///
    /// `Ok(None)` means the request carries nothing this verifier handles.
    ///
    /// # Errors
    /// Returns error when the request carries this verifier's credentials and they are
    /// rejected. The chain logs the error and moves on either way.
    async fn verify(&self, request: &InboundRequest) -> Result<Option<AccessToken>>;

    /// Add this verifier's parameters to the 401 challenge
    fn challenge(&self, builder: WwwAuthenticateBuilder) -> WwwAuthenticateBuilder {
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(uri: &str, host: Option<&str>) -> http::request::Parts {
        let mut builder = http::Request::builder().method(Method::POST).uri(uri);
        if let Some(host) = host {
            builder = builder.header(HOST, host);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_absolute_uri_from_origin_form() {
        let request =
            InboundRequest::from_http_parts(&parts("/mcp?x=1", None), Some("https://api.example.com/"));
        assert_eq!(request.uri, "https://api.example.com/mcp?x=1");

        let request = InboundRequest::from_http_parts(&parts("/mcp", Some("api.example.com")), None);
        assert_eq!(request.uri, "https://api.example.com/mcp");

        let request =
            InboundRequest::from_http_parts(&parts("http://localhost:8080/mcp", None), None);
        assert_eq!(request.uri, "http://localhost:8080/mcp");
    }

    #[test]
    fn test_authorization_split() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "DPoP abc.def".parse().unwrap());
        let request = InboundRequest::new(Method::GET, "https://api.example.com/", headers);
        assert_eq!(request.authorization(), Some(("DPoP", "abc.def")));
    }

    #[test]
    fn test_debug_hides_header_values() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret-key".parse().unwrap());
        let request = InboundRequest::new(Method::GET, "https://api.example.com/", headers);
        assert!(!format!("{request:?}").contains("secret-key"));
    }
}
