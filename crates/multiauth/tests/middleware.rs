//! The tower layer in front of a resource service
//!
//! Run with `cargo test --features middleware`.

#![cfg(feature = "middleware")]

mod common;

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use common::DEMO_API_KEY;
use http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{Method, Request, Response, StatusCode};
use multiauth::dpop::{DPOP_HEADER, DpopProofGenerator};
use multiauth::server::{
    ApiKeyVerifier, IntrospectionResponse, MetadataRoutes, OAuthTokenVerifier, StaticIntrospector,
};
use multiauth::tower::{AuthLayer, AuthLayerConfig};
use multiauth::{
    AccessToken, AuthProtocolMetadata, DiscoveryDocument, ProtocolPreferences,
    ResourceServerConfig, VerifierChain, WwwAuthenticate,
};
use pretty_assertions::assert_eq;
use tower::{ServiceBuilder, ServiceExt};

const ORIGIN: &str = "https://api.example.com";

async fn whoami(req: Request<()>) -> Result<Response<Bytes>, Infallible> {
    let body = req.extensions().get::<AccessToken>().map_or_else(
        || "anonymous".to_string(),
        |token| format!("{}:{}", token.protocol_id, token.subject),
    );
    Ok(Response::new(Bytes::from(body)))
}

fn resource_config() -> ResourceServerConfig {
    ResourceServerConfig::new(format!("{ORIGIN}/mcp"))
        .with_authorization_server("https://auth.example.com")
        .with_protocol(AuthProtocolMetadata::new("oauth2", "2.1"))
        .with_protocol(AuthProtocolMetadata::new("api_key", "1.0"))
        .with_default_protocol("oauth2")
        .with_preferences(ProtocolPreferences::new().with("oauth2", 1).with("api_key", 2))
}

fn layer(generator: &DpopProofGenerator) -> AuthLayer {
    let introspector = StaticIntrospector::new().with_token(
        "bound-token",
        IntrospectionResponse::active("carol").with_jkt(generator.thumbprint()),
    );
    let chain = VerifierChain::new()
        .with(Arc::new(ApiKeyVerifier::new().with_key(DEMO_API_KEY, "demo-client")))
        .with(Arc::new(OAuthTokenVerifier::new(Arc::new(introspector)).require_dpop()));
    let routes = MetadataRoutes::from_config(&resource_config()).unwrap();
    AuthLayer::new(chain)
        .with_metadata(routes)
        .config(AuthLayerConfig::default().public_origin(ORIGIN))
}

async fn body_text(response: Response<Bytes>) -> String {
    String::from_utf8(response.into_body().to_vec()).unwrap()
}

#[tokio::test]
async fn test_dpop_bound_token_through_layer() {
    // GIVEN: the layer behind a proxy that strips the origin
    let generator = DpopProofGenerator::generate().unwrap();
    let service = ServiceBuilder::new()
        .layer(layer(&generator))
        .service_fn(whoami);

    // WHEN: the client proves possession for the public URL
    let proof = generator
        .generate_proof("POST", &format!("{ORIGIN}/mcp"), Some("bound-token"))
        .unwrap()
        .into_header_value();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .header(AUTHORIZATION, "DPoP bound-token")
        .header(DPOP_HEADER, proof)
        .body(())
        .unwrap();
    let response = service.oneshot(request).await.unwrap();

    // THEN: the handler sees the authenticated subject
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "oauth2:carol");
}

#[tokio::test]
async fn test_unauthenticated_request_gets_discoverable_challenge() {
    let generator = DpopProofGenerator::generate().unwrap();
    let service = ServiceBuilder::new()
        .layer(layer(&generator))
        .service_fn(whoami);

    let response = service
        .clone()
        .oneshot(Request::post("/mcp").body(()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // the challenge names the metadata document and the protocols
    let header = response.headers()[WWW_AUTHENTICATE].to_str().unwrap();
    let challenge = WwwAuthenticate::parse(header);
    assert_eq!(challenge.auth_protocols, vec!["oauth2", "api_key"]);
    assert_eq!(challenge.default_protocol.as_deref(), Some("oauth2"));
    let metadata_url = challenge.resource_metadata.unwrap();
    assert_eq!(
        metadata_url,
        format!("{ORIGIN}/.well-known/oauth-protected-resource/mcp")
    );

    // and that document is served without credentials
    let path = url::Url::parse(&metadata_url).unwrap().path().to_string();
    let response = service
        .oneshot(Request::get(path.as_str()).body(()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    let prm: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(prm["resource"], format!("{ORIGIN}/mcp"));
    assert_eq!(prm["mcp_default_auth_protocol"], "oauth2");
}

#[tokio::test]
async fn test_discovery_document_served() {
    let generator = DpopProofGenerator::generate().unwrap();
    let service = ServiceBuilder::new()
        .layer(layer(&generator))
        .service_fn(whoami);

    let response = service
        .oneshot(
            Request::get("/.well-known/authorization_servers/mcp")
                .body(())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let document: DiscoveryDocument = serde_json::from_slice(response.body()).unwrap();
    let ids: Vec<&str> = document
        .protocols
        .iter()
        .map(|p| p.protocol_id.as_str())
        .collect();
    assert_eq!(ids, vec!["oauth2", "api_key"]);
    assert_eq!(
        document.protocol_preferences.and_then(|p| p.get("api_key")),
        Some(2)
    );
}

#[tokio::test]
async fn test_api_key_and_anonymous_modes() {
    let generator = DpopProofGenerator::generate().unwrap();

    let strict = ServiceBuilder::new()
        .layer(layer(&generator))
        .service_fn(whoami);
    let response = strict
        .oneshot(
            Request::post("/mcp")
                .header("x-api-key", DEMO_API_KEY)
                .body(())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_text(response).await, "api_key:demo-client");

    let relaxed = ServiceBuilder::new()
        .layer(layer(&generator).allow_anonymous())
        .service_fn(whoami);
    let response = relaxed
        .oneshot(
            Request::post("/mcp")
                .header("x-api-key", "wrong")
                .body(())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "anonymous");
}
