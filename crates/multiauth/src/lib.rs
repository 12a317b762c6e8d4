//! # Multiauth - Multi-Protocol Authorization
//!
//! Authorization for resource servers that accept more than one kind of credential, and
//! for the clients that call them. A server advertises which protocols it accepts; a
//! client discovers that list, picks the best protocol it supports, obtains credentials
//! and retries once when challenged.
//!
//! ## Key Features
//!
//! - **Discovery** - RFC 9728 protected resource metadata plus a unified
//!   `authorization_servers` document, with path-relative and root fallbacks and a TTL cache
//! - **Protocol selection** - registry ordered by server preferences, client preference
//!   and server default
//! - **OAuth 2.1** - metadata discovery, dynamic client registration, PKCE, authorization
//!   code, client credentials and refresh grants, RFC 8707 resource indicators
//! - **API keys** - `X-API-Key` with `Bearer` fallback, constant-time comparison on servers
//! - **DPoP** - RFC 9449 proofs on outgoing requests and verification on servers (via
//!   [`dpop`])
//! - **Client interceptor** - credential attachment, single-flight re-authentication and
//!   one retry per request
//! - **Server verifier chain** - ordered verifiers, combined `WWW-Authenticate` challenge
//!   and well-known metadata routes
//!
//! ## Architecture
//!
//! - [`types`] - Wire documents and protocol identifiers
//! - [`challenge`] - `WWW-Authenticate` parsing and building
//! - [`config`] - Client and resource server configuration
//! - [`credentials`] / [`store`] - Credential types and storage
//! - [`transport`] - HTTP transport seam
//! - [`discovery`] - Discovery resolver
//! - [`protocols`] / [`registry`] - Client-side protocols and selection
//! - [`oauth2`] - OAuth 2.1 flow engine
//! - [`interceptor`] - Client-side request interceptor
//! - [`server`] - Server-side verifiers and metadata routes
//! - `tower` - Tower middleware (feature `middleware`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use multiauth::{
//!     AuthInterceptor, ClientAuthConfig, MemoryCredentialStore, OutgoingRequest,
//!     ProtocolRegistry, ReqwestTransport,
//! };
//! use multiauth::protocols::ApiKeyProtocol;
//!
//! # tokio_test::block_on(async {
//! let registry = ProtocolRegistry::new()
//!     .with(Arc::new(ApiKeyProtocol::new("demo-api-key-12345")))?;
//!
//! let interceptor = AuthInterceptor::new(
//!     ClientAuthConfig::new("https://api.example.com/mcp"),
//!     Arc::new(registry),
//!     Arc::new(MemoryCredentialStore::new()),
//!     Arc::new(ReqwestTransport::new(Duration::from_secs(30))?),
//! )?;
//!
//! let url = url::Url::parse("https://api.example.com/mcp").expect("valid url");
//! let response = interceptor.execute(OutgoingRequest::get_json(url)).await?;
//! println!("status: {}", response.status);
//! # Ok::<(), multiauth::AuthError>(())
//! # });
//! ```
//!
//! ## Feature Flags
//!
//! - `middleware` (alias `tower`) - Tower layer for resource servers
//! - `full` - All features enabled
//!
//! ## Standards Compliance
//!
//! - **RFC 6749** - OAuth 2.0 Authorization Framework
//! - **RFC 6750** - Bearer Token Usage
//! - **RFC 7591** - Dynamic Client Registration
//! - **RFC 7636** - Proof Key for Code Exchange (PKCE)
//! - **RFC 7662** - Token Introspection
//! - **RFC 8414** - Authorization Server Metadata
//! - **RFC 8707** - Resource Indicators
//! - **RFC 9449** - Demonstrating Proof-of-Possession (DPoP)
//! - **RFC 9728** - Protected Resource Metadata

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod challenge;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod interceptor;
pub mod oauth2;
pub mod protocols;
pub mod registry;
pub mod server;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(feature = "middleware")]
#[cfg_attr(docsrs, doc(cfg(feature = "middleware")))]
pub mod tower;

/// Proof-of-possession primitives
pub use multiauth_dpop as dpop;

#[doc(inline)]
pub use error::{AuthError, AuthErrorKind, Result};

#[doc(inline)]
pub use types::{
    API_KEY_HEADER, API_KEY_PROTOCOL, AuthProtocolMetadata, DISCOVERY_WELL_KNOWN,
    DiscoveryDocument, MUTUAL_TLS_PROTOCOL, OAUTH2_PROTOCOL, PRM_WELL_KNOWN,
    ProtectedResourceMetadata, ProtocolPreferences,
};

pub use challenge::{ScopeChallenge, WwwAuthenticate, WwwAuthenticateBuilder};
pub use config::{
    ClientAuthConfig, DiscoveryConfig, OAuth2ClientConfig, OAuth2GrantType, ResourceServerConfig,
};
pub use credentials::{AuthCredentials, ClientInfo, OAuthToken, StoredCredentials};
pub use discovery::{DiscoveryResolver, DiscoveryResult, DiscoverySource};
pub use interceptor::{AuthInterceptor, PreparedRequest, ResponseAction};
pub use protocols::{AuthProtocol, AuthenticationContext, DpopCapability};
pub use registry::ProtocolRegistry;
pub use server::{AccessToken, InboundRequest, TokenVerifier, VerifierChain};
pub use store::{CredentialRecord, CredentialStore, MemoryCredentialStore};
pub use transport::{HttpTransport, IncomingResponse, OutgoingRequest, ReqwestTransport};
