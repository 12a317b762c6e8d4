//! OAuth 2.1 flows against a mock authorization server
//!
//! # Standards Tested
//! - RFC 6749: client credentials, authorization code and refresh grants
//! - RFC 7591: dynamic client registration
//! - RFC 7636: PKCE
//! - RFC 8414: authorization server metadata
//! - RFC 8707: resource indicators

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{MockAuthServer, MockResourceServer, init_tracing, transport};
use http::Method;
use multiauth::oauth2::{
    AuthorizationCallback, AuthorizationHandler, AuthorizationRequest, FlowParams, FlowState,
    FlowStep, OAuthFlow, run_flow,
};
use multiauth::protocols::OAuth2Protocol;
use multiauth::{
    AuthError, AuthInterceptor, AuthProtocol, AuthenticationContext, ClientAuthConfig,
    CredentialStore, MemoryCredentialStore, OAuth2ClientConfig, OAuthToken, OutgoingRequest,
    ProtectedResourceMetadata, ProtocolRegistry, StoredCredentials,
};
use pretty_assertions::assert_eq;
use url::Url;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

const STEP: Duration = Duration::from_secs(5);

/// Approves every authorization request with a fixed code
#[derive(Debug)]
struct ApprovingUser;

#[async_trait]
impl AuthorizationHandler for ApprovingUser {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> multiauth::Result<AuthorizationCallback> {
        let query: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        assert!(query.iter().any(|(k, v)| k == "code_challenge_method" && v == "S256"));
        assert!(query.iter().any(|(k, _)| k == "resource"));
        Ok(AuthorizationCallback {
            code: "auth-code-1".into(),
            state: request.state.clone(),
        })
    }
}

/// Declines every authorization request
#[derive(Debug)]
struct DecliningUser;

#[async_trait]
impl AuthorizationHandler for DecliningUser {
    async fn authorize(
        &self,
        _request: &AuthorizationRequest,
    ) -> multiauth::Result<AuthorizationCallback> {
        Err(AuthError::denied("user closed the browser"))
    }
}

fn params(auth: &MockAuthServer, config: OAuth2ClientConfig) -> FlowParams {
    FlowParams {
        issuer: Url::parse(&auth.issuer()).unwrap(),
        metadata_url: None,
        resource: Url::parse("https://api.example.com/mcp").unwrap(),
        config,
        stored_client: None,
        dpop: None,
    }
}

#[tokio::test]
async fn test_client_credentials_grant() {
    init_tracing();
    // GIVEN: an authorization server issuing client credentials tokens
    let auth = MockAuthServer::start().await;
    auth.mock_metadata().await;
    auth.mock_token("client_credentials", "cc-token", None, 1).await;

    // AND: an OAuth2 protocol pointed at it through protected resource metadata
    let protocol =
        OAuth2Protocol::new(OAuth2ClientConfig::client_credentials("svc-1", "secret-1")).unwrap();
    let resource = Url::parse("https://api.example.com/mcp").unwrap();
    let mut prm = ProtectedResourceMetadata::new(resource.as_str());
    prm.authorization_servers.push(auth.issuer());
    let transport = transport();
    let mut context = AuthenticationContext::new(&resource, transport.as_ref());
    context.protected_resource = Some(&prm);

    // WHEN: authenticating
    let credentials = protocol.authenticate(&context).await.unwrap();

    // THEN: the token comes back as credentials
    assert_eq!(credentials.access_token(), Some("cc-token"));
    assert_eq!(protocol.flows_started(), 1);

    // AND: the secret went in a Basic header, the resource in the form
    let requests = auth.server.received_requests().await.unwrap();
    let token_request = requests.iter().find(|r| r.url.path() == "/token").unwrap();
    let body = String::from_utf8_lossy(&token_request.body).to_string();
    assert!(body.contains("resource=https%3A%2F%2Fapi.example.com%2Fmcp"));
    assert!(
        token_request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Basic "))
    );
}

#[tokio::test]
async fn test_code_flow_with_registration() {
    let auth = MockAuthServer::start().await;
    auth.mock_metadata().await;
    auth.mock_registration("dyn-client-1").await;
    auth.mock_token("authorization_code", "code-token", Some("rt-1"), 1)
        .await;

    let flow = OAuthFlow::new(params(&auth, OAuth2ClientConfig::default())).unwrap();
    assert_eq!(flow.state(), FlowState::Start);

    let outcome = run_flow(flow, transport().as_ref(), Some(&ApprovingUser), STEP)
        .await
        .unwrap();

    assert_eq!(outcome.token.access_token, "code-token");
    assert_eq!(outcome.token.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(
        outcome.registered_client.map(|c| c.client_id).as_deref(),
        Some("dyn-client-1")
    );

    let requests = auth.server.received_requests().await.unwrap();
    let token_request = requests.iter().find(|r| r.url.path() == "/token").unwrap();
    let body = String::from_utf8_lossy(&token_request.body).to_string();
    assert!(body.contains("code=auth-code-1"));
    assert!(body.contains("code_verifier="));
    assert!(body.contains("client_id=dyn-client-1"));
}

#[tokio::test]
async fn test_user_denial_fails_at_authorization() {
    let auth = MockAuthServer::start().await;
    auth.mock_metadata().await;
    auth.mock_registration("dyn-client-2").await;

    let flow = OAuthFlow::new(params(&auth, OAuth2ClientConfig::default())).unwrap();
    let err = run_flow(flow, transport().as_ref(), Some(&DecliningUser), STEP)
        .await
        .unwrap_err();

    match err {
        AuthError::OAuthFlowFailed { step, detail } => {
            assert_eq!(step, FlowStep::Authorization);
            assert!(detail.contains("user closed the browser"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_token_error_names_step() {
    let auth = MockAuthServer::start().await;
    auth.mock_metadata().await;
    auth.mock_token_error("client_credentials", "invalid_client").await;

    let flow = OAuthFlow::new(params(
        &auth,
        OAuth2ClientConfig::client_credentials("svc-1", "wrong"),
    ))
    .unwrap();
    let err = run_flow(flow, transport().as_ref(), None, STEP)
        .await
        .unwrap_err();

    match err {
        AuthError::OAuthFlowFailed { step, detail } => {
            assert_eq!(step, FlowStep::TokenExchange);
            assert!(detail.contains("invalid_client"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_metadata_fails_first_step() {
    // nothing mounted: every well-known candidate 404s
    let auth = MockAuthServer::start().await;

    let flow = OAuthFlow::new(params(
        &auth,
        OAuth2ClientConfig::client_credentials("svc-1", "secret-1"),
    ))
    .unwrap();
    let err = run_flow(flow, transport().as_ref(), None, STEP)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::OAuthFlowFailed {
            step: FlowStep::AsMetadata,
            ..
        }
    ));
}

#[tokio::test]
async fn test_interceptor_obtains_token_from_oauth_fallback() {
    init_tracing();
    // GIVEN: a resource whose metadata only names an authorization server
    let auth = MockAuthServer::start().await;
    auth.mock_metadata().await;
    auth.mock_token("client_credentials", "fresh-token", None, 1)
        .await;

    let resource = MockResourceServer::start().await;
    resource
        .mock_document(
            "/.well-known/oauth-protected-resource",
            resource.prm_with_authorization_server(&auth.issuer()),
            None,
            1,
        )
        .await;
    resource.mock_bearer_protected("fresh-token").await;

    let protocol = Arc::new(
        OAuth2Protocol::new(OAuth2ClientConfig::client_credentials("svc-1", "secret-1")).unwrap(),
    );
    let registry = ProtocolRegistry::new().with(protocol.clone()).unwrap();
    let store = Arc::new(MemoryCredentialStore::new());
    let interceptor = AuthInterceptor::new(
        ClientAuthConfig::new(resource.resource_url()),
        Arc::new(registry),
        store.clone(),
        transport(),
    )
    .unwrap();

    // WHEN: calling the resource
    let response = interceptor
        .execute(OutgoingRequest::new(Method::POST, resource.resource()))
        .await
        .unwrap();

    // THEN: one flow ran and the retried request succeeded
    assert!(response.is_success());
    assert_eq!(protocol.flows_started(), 1);
    let record = store
        .get_credentials(resource.resource().as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        record.credentials.to_oauth_token().unwrap().access_token,
        "fresh-token"
    );
}

#[tokio::test]
async fn test_interceptor_prefers_refresh() {
    // GIVEN: a stored token the resource no longer accepts, with a refresh token
    let auth = MockAuthServer::start().await;
    auth.mock_metadata().await;
    auth.mock_token("refresh_token", "refreshed-token", None, 1)
        .await;
    auth.mock_token("client_credentials", "unused", None, 0).await;

    let resource = MockResourceServer::start().await;
    resource
        .mock_document(
            "/.well-known/oauth-protected-resource",
            resource.prm_with_authorization_server(&auth.issuer()),
            None,
            1,
        )
        .await;
    resource.mock_bearer_protected("refreshed-token").await;

    let store = Arc::new(MemoryCredentialStore::new());
    let mut stale = OAuthToken::bearer("stale-token");
    stale.refresh_token = Some("rt-1".into());
    store
        .store_credentials(
            resource.resource().as_str(),
            StoredCredentials::OAuth(stale),
        )
        .await
        .unwrap();

    let registry = ProtocolRegistry::new()
        .with(Arc::new(
            OAuth2Protocol::new(OAuth2ClientConfig::client_credentials("svc-1", "secret-1"))
                .unwrap(),
        ))
        .unwrap();
    let interceptor = AuthInterceptor::new(
        ClientAuthConfig::new(resource.resource_url()),
        Arc::new(registry),
        store.clone(),
        transport(),
    )
    .unwrap();

    // WHEN: the stale token draws a 401
    let response = interceptor
        .execute(OutgoingRequest::new(Method::POST, resource.resource()))
        .await
        .unwrap();

    // THEN: the refresh grant replaced it; the refresh token is kept
    assert!(response.is_success());
    let token = store
        .get_credentials(resource.resource().as_str())
        .await
        .unwrap()
        .unwrap()
        .credentials
        .to_oauth_token()
        .unwrap();
    assert_eq!(token.access_token, "refreshed-token");
    assert_eq!(token.refresh_token.as_deref(), Some("rt-1"));
}

#[tokio::test]
async fn test_dpop_proof_sent_to_token_endpoint() {
    let auth = MockAuthServer::start().await;
    auth.mock_metadata().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header_exists("dpop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "bound-token",
            "token_type": "DPoP",
            "expires_in": 600,
        })))
        .expect(1)
        .mount(&auth.server)
        .await;

    let mut flow_params = params(
        &auth,
        OAuth2ClientConfig::client_credentials("svc-1", "secret-1"),
    );
    flow_params.dpop = Some(multiauth::dpop::DpopProofGenerator::generate().unwrap());
    let outcome = run_flow(
        OAuthFlow::new(flow_params).unwrap(),
        transport().as_ref(),
        None,
        STEP,
    )
    .await
    .unwrap();

    assert!(outcome.token.is_dpop());
    // the server's token type is kept as issued
    assert_eq!(outcome.token.token_type, "DPoP");
}
