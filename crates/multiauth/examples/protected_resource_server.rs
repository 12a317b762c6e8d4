//! Resource Server with Multi-Protocol Authorization
//!
//! This example shows how to put the authorization layer in front of a service that:
//! 1. Advertises its protocols via RFC 9728 metadata and unified discovery
//! 2. Accepts API keys and DPoP-bound OAuth tokens through a verifier chain
//! 3. Answers unauthenticated requests with a discoverable 401
//!
//! Run with:
//! ```sh
//! RUST_LOG=multiauth=debug cargo run --example protected_resource_server --features middleware
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use multiauth::dpop::{DPOP_HEADER, DpopProofGenerator};
use multiauth::server::{
    ApiKeyVerifier, IntrospectionResponse, MetadataRoutes, OAuthTokenVerifier, StaticIntrospector,
};
use multiauth::tower::{AuthLayer, AuthLayerConfig};
use multiauth::{
    AccessToken, AuthProtocolMetadata, ProtocolPreferences, ResourceServerConfig, VerifierChain,
};
use tower::{ServiceBuilder, ServiceExt};
use tracing_subscriber::EnvFilter;

const ORIGIN: &str = "https://mcp.example.com";

async fn handler(req: Request<()>) -> Result<Response<Bytes>, Infallible> {
    let body = match req.extensions().get::<AccessToken>() {
        Some(token) => format!(
            "{{\"subject\":\"{}\",\"protocol\":\"{}\"}}",
            token.subject, token.protocol_id
        ),
        None => "{\"subject\":null}".to_string(),
    };
    Ok(Response::new(Bytes::from(body)))
}

fn show(label: &str, response: &Response<Bytes>) {
    println!("   {label}: {}", response.status());
    for (name, value) in response.headers() {
        println!("     {}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    println!("     {}", String::from_utf8_lossy(response.body()));
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Multi-Protocol Resource Server Example ===\n");

    // Step 1: Describe what the resource advertises
    let config = ResourceServerConfig::new(format!("{ORIGIN}/mcp"))
        .with_authorization_server("https://auth.example.com")
        .with_protocol(AuthProtocolMetadata::new("oauth2", "2.1"))
        .with_protocol(AuthProtocolMetadata::new("api_key", "1.0"))
        .with_default_protocol("oauth2")
        .with_preferences(ProtocolPreferences::new().with("oauth2", 1).with("api_key", 2));
    let routes = MetadataRoutes::from_config(&config)?;
    println!("1. Metadata routes:");
    for route in routes.routes() {
        println!("   GET {}", route.path);
    }

    // Step 2: Verifiers, tried in order
    let client_key = DpopProofGenerator::generate()?;
    let introspector = StaticIntrospector::new().with_token(
        "bound-token",
        IntrospectionResponse::active("alice")
            .with_scope("mcp:read")
            .with_jkt(client_key.thumbprint()),
    );
    let chain = VerifierChain::new()
        .with(Arc::new(
            ApiKeyVerifier::new().with_key("demo-api-key-12345", "demo-client"),
        ))
        .with(Arc::new(
            OAuthTokenVerifier::new(Arc::new(introspector)).require_dpop(),
        ));
    println!("\n2. Verifier chain: {:?}", chain.protocol_ids());

    // Step 3: Wrap the handler
    let service = ServiceBuilder::new()
        .layer(
            AuthLayer::new(chain)
                .with_metadata(routes)
                .config(AuthLayerConfig::default().public_origin(ORIGIN)),
        )
        .service_fn(handler);

    println!("\n3. Requests:");
    let response = service
        .clone()
        .oneshot(Request::post("/mcp").body(())?)
        .await?;
    show("no credentials", &response);
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = service
        .clone()
        .oneshot(Request::get("/.well-known/oauth-protected-resource/mcp").body(())?)
        .await?;
    show("metadata", &response);

    let response = service
        .clone()
        .oneshot(
            Request::post("/mcp")
                .header("x-api-key", "demo-api-key-12345")
                .body(())?,
        )
        .await?;
    show("api key", &response);

    let proof = client_key
        .generate_proof("POST", &format!("{ORIGIN}/mcp"), Some("bound-token"))?
        .into_header_value();
    let response = service
        .oneshot(
            Request::post("/mcp")
                .header("authorization", "DPoP bound-token")
                .header(DPOP_HEADER, proof)
                .body(())?,
        )
        .await?;
    show("dpop-bound token", &response);

    Ok(())
}
