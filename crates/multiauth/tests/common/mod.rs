//! Common test utilities for integration tests
//!
//! Mock resource and authorization servers built on wiremock, plus the transport and
//! tracing setup every scenario shares.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use multiauth::{HttpTransport, ReqwestTransport};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const DEMO_API_KEY: &str = "demo-api-key-12345";

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Real HTTP transport pointed at the mock servers
pub fn transport() -> Arc<dyn HttpTransport> {
    Arc::new(ReqwestTransport::new(Duration::from_secs(5)).expect("reqwest client"))
}

/// A protected resource at `{uri}/mcp`
pub struct MockResourceServer {
    pub server: MockServer,
}

impl MockResourceServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// `{uri}/mcp`
    pub fn resource_url(&self) -> String {
        format!("{}/mcp", self.server.uri())
    }

    pub fn resource(&self) -> Url {
        Url::parse(&self.resource_url()).expect("valid resource url")
    }

    /// Serve `body` at `route` with an optional `Cache-Control`, expecting `hits` fetches
    pub async fn mock_document(
        &self,
        route: &str,
        body: Value,
        cache_control: Option<&str>,
        hits: impl Into<wiremock::Times>,
    ) {
        let mut response = ResponseTemplate::new(200).set_body_json(body);
        if let Some(value) = cache_control {
            response = response.insert_header("cache-control", value);
        }
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .expect(hits)
            .mount(&self.server)
            .await;
    }

    /// Fail the test if `route` is ever fetched
    pub async fn forbid(&self, route: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&self.server)
            .await;
    }

    /// Protected resource metadata advertising the given protocols
    pub fn prm_with_protocols(&self, protocols: Value, default: Option<&str>) -> Value {
        let mut prm = json!({
            "resource": self.resource_url(),
            "mcp_auth_protocols": protocols,
        });
        if let Some(default) = default {
            prm["mcp_default_auth_protocol"] = json!(default);
        }
        prm
    }

    /// RFC 9728-only metadata pointing at an authorization server
    pub fn prm_with_authorization_server(&self, issuer: &str) -> Value {
        json!({
            "resource": self.resource_url(),
            "authorization_servers": [issuer],
            "scopes_supported": ["mcp:read"],
        })
    }

    /// Accept requests carrying `X-API-Key: {key}`; answer everything else on `/mcp`
    /// with a 401 pointing at the root metadata document
    pub async fn mock_api_key_protected(&self, key: &str) {
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(wiremock::matchers::header("x-api-key", key))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&self.server)
            .await;
        self.mock_unauthorized().await;
    }

    /// Accept `Authorization: Bearer {token}` on `/mcp`; 401 otherwise
    pub async fn mock_bearer_protected(&self, token: &str) {
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(wiremock::matchers::header(
                "authorization",
                format!("Bearer {token}").as_str(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&self.server)
            .await;
        self.mock_unauthorized().await;
    }

    async fn mock_unauthorized(&self) {
        let challenge = format!(
            r#"Bearer resource_metadata="{}/.well-known/oauth-protected-resource""#,
            self.uri()
        );
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(401).insert_header("www-authenticate", challenge))
            .mount(&self.server)
            .await;
    }
}

/// OAuth 2.1 authorization server
pub struct MockAuthServer {
    pub server: MockServer,
}

impl MockAuthServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    /// RFC 8414 metadata at the root well-known path
    pub async fn mock_metadata(&self) {
        let issuer = self.issuer();
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/authorize"),
                "token_endpoint": format!("{issuer}/token"),
                "registration_endpoint": format!("{issuer}/register"),
                "code_challenge_methods_supported": ["S256"],
                "grant_types_supported": ["authorization_code", "client_credentials", "refresh_token"],
            })))
            .mount(&self.server)
            .await;
    }

    /// Token endpoint answering `grant_type={grant}`, expecting `hits` calls
    pub async fn mock_token(
        &self,
        grant: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        hits: impl Into<wiremock::Times>,
    ) {
        let mut body = json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 3600,
        });
        if let Some(refresh) = refresh_token {
            body["refresh_token"] = json!(refresh);
        }
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(format!("grant_type={grant}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(hits)
            .mount(&self.server)
            .await;
    }

    /// Token endpoint rejecting `grant_type={grant}`
    pub async fn mock_token_error(&self, grant: &str, error: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(format!("grant_type={grant}")))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": error,
                "error_description": "rejected by mock",
            })))
            .mount(&self.server)
            .await;
    }

    /// Dynamic client registration issuing `client_id`
    pub async fn mock_registration(&self, client_id: &str) {
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "client_id": client_id,
                "redirect_uris": ["http://localhost:8765/callback"],
                "token_endpoint_auth_method": "none",
            })))
            .expect(1)
            .mount(&self.server)
            .await;
    }
}
