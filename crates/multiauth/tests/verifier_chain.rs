//! Server-side verification: API keys, DPoP-bound OAuth tokens, remote introspection

mod common;

use std::sync::Arc;

use common::DEMO_API_KEY;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use multiauth::dpop::{DpopError, DpopProofGenerator};
use multiauth::server::{
    ApiKeyVerifier, IntrospectionClient, IntrospectionResponse, OAuthTokenVerifier,
    StaticIntrospector, TokenIntrospector,
};
use multiauth::{
    AuthError, InboundRequest, TokenVerifier, VerifierChain, WwwAuthenticate,
    WwwAuthenticateBuilder,
};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RESOURCE: &str = "https://api.example.com/mcp";

fn request(headers: &[(&str, &str)]) -> InboundRequest {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    InboundRequest::new(Method::POST, RESOURCE, map)
}

fn dpop_verifier(generator: &DpopProofGenerator) -> OAuthTokenVerifier {
    let introspector = StaticIntrospector::new().with_token(
        "bound-token",
        IntrospectionResponse::active("carol").with_jkt(generator.thumbprint()),
    );
    OAuthTokenVerifier::new(Arc::new(introspector)).require_dpop()
}

fn challenge() -> WwwAuthenticateBuilder {
    WwwAuthenticateBuilder::new()
        .with_resource_metadata("https://api.example.com/.well-known/oauth-protected-resource/mcp")
        .with_auth_protocols(["oauth2", "api_key"])
}

#[tokio::test]
async fn test_api_key_header_authenticates() {
    // GIVEN: a chain accepting the demo key
    let chain = VerifierChain::new()
        .with(Arc::new(ApiKeyVerifier::new().with_key(DEMO_API_KEY, "demo-client")));

    // WHEN: the key arrives in X-API-Key
    let token = chain
        .verify(&request(&[("x-api-key", DEMO_API_KEY)]))
        .await
        .unwrap();

    // THEN: the configured subject is authenticated
    assert_eq!(token.subject, "demo-client");
    assert_eq!(token.protocol_id, "api_key");
}

#[tokio::test]
async fn test_wrong_api_key_falls_through_to_401() {
    let generator = DpopProofGenerator::generate().unwrap();
    let chain = VerifierChain::new()
        .with(Arc::new(ApiKeyVerifier::from_keys([DEMO_API_KEY])))
        .with(Arc::new(dpop_verifier(&generator)));

    let err = chain
        .verify(&request(&[("x-api-key", "not-the-key")]))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::VerifierChainExhausted));

    let response = chain.unauthorized(&challenge()).into_response::<bytes::Bytes>();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let header = response.headers()[WWW_AUTHENTICATE].to_str().unwrap();
    let parsed = WwwAuthenticate::parse(header);
    assert_eq!(parsed.auth_protocols, vec!["oauth2", "api_key"]);
    assert!(header.contains(r#"DPoP algs="ES256""#));
}

#[tokio::test]
async fn test_api_key_as_bearer_then_oauth() {
    let introspector = StaticIntrospector::new()
        .with_token("oauth-token", IntrospectionResponse::active("dave").with_scope("mcp:read"));
    let chain = VerifierChain::new()
        .with(Arc::new(ApiKeyVerifier::from_keys([DEMO_API_KEY])))
        .with(Arc::new(OAuthTokenVerifier::new(Arc::new(introspector))));

    let by_key = chain
        .verify(&request(&[("authorization", "Bearer demo-api-key-12345")]))
        .await
        .unwrap();
    assert_eq!(by_key.subject, "api_key:0");

    // not a configured key, so the OAuth verifier gets it
    let by_token = chain
        .verify(&request(&[("authorization", "Bearer oauth-token")]))
        .await
        .unwrap();
    assert_eq!(by_token.subject, "dave");
    assert!(by_token.has_scope("mcp:read"));
}

#[tokio::test]
async fn test_bearer_without_proof_rejected_when_dpop_required() {
    // GIVEN: a verifier that only accepts DPoP-bound tokens
    let generator = DpopProofGenerator::generate().unwrap();
    let verifier = dpop_verifier(&generator);

    // WHEN: the token arrives as a plain bearer token
    let err = verifier
        .verify(&request(&[("authorization", "Bearer bound-token")]))
        .await
        .unwrap_err();

    // THEN: it is rejected for the missing proof, and the chain answers 401
    assert!(matches!(err, AuthError::DpopValidation(DpopError::MissingProof)));
    let chain = VerifierChain::new().with(Arc::new(verifier));
    assert!(matches!(
        chain
            .verify(&request(&[("authorization", "Bearer bound-token")]))
            .await,
        Err(AuthError::VerifierChainExhausted)
    ));
}

#[tokio::test]
async fn test_proof_for_other_uri_rejected() {
    let generator = DpopProofGenerator::generate().unwrap();
    let verifier = dpop_verifier(&generator);
    let proof = generator
        .generate_proof("POST", "https://elsewhere.example.com/mcp", Some("bound-token"))
        .unwrap()
        .into_header_value();

    let err = verifier
        .verify(&request(&[
            ("authorization", "DPoP bound-token"),
            ("dpop", proof.as_str()),
        ]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::DpopValidation(DpopError::HttpBindingFailed { .. })
    ));
}

#[tokio::test]
async fn test_valid_proof_authenticates_with_thumbprint() {
    let generator = DpopProofGenerator::generate().unwrap();
    let chain = VerifierChain::new().with(Arc::new(dpop_verifier(&generator)));
    let proof = generator
        .generate_proof("POST", RESOURCE, Some("bound-token"))
        .unwrap()
        .into_header_value();

    let token = chain
        .verify(&request(&[
            ("authorization", "DPoP bound-token"),
            ("dpop", proof.as_str()),
        ]))
        .await
        .unwrap();
    assert_eq!(token.subject, "carol");
    assert_eq!(token.dpop_thumbprint.as_deref(), Some(generator.thumbprint()));
}

#[tokio::test]
async fn test_remote_introspection() {
    // GIVEN: an RFC 7662 endpoint that knows one token
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .and(body_string_contains("token=live-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "sub": "erin",
            "client_id": "svc-1",
            "scope": "mcp:read mcp:write",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": false})))
        .mount(&server)
        .await;

    let endpoint = Url::parse(&format!("{}/introspect", server.uri())).unwrap();
    let client = IntrospectionClient::new(endpoint, "resource-server", Some("s3cret".into())).unwrap();
    assert!(client.introspect("live-token").await.unwrap().active);

    let verifier = OAuthTokenVerifier::new(Arc::new(client)).with_required_scopes(["mcp:write"]);
    let token = verifier
        .verify(&request(&[("authorization", "Bearer live-token")]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(token.subject, "erin");
    assert_eq!(token.client_id.as_deref(), Some("svc-1"));

    let err = verifier
        .verify(&request(&[("authorization", "Bearer dead-token")]))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken { .. }));

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(body.contains("client_secret=s3cret"));
    assert!(body.contains("token_type_hint=access_token"));
}
