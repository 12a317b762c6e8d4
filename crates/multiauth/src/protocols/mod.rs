//! Authentication protocols
//!
//! Each protocol implements [`AuthProtocol`]: it can obtain credentials, attach them to
//! a request and check them locally. Protocols that can bind tokens to a key also
//! expose [`DpopCapability`].

pub mod api_key;
pub mod mutual_tls;
pub mod oauth2;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use multiauth_dpop::DpopProof;
use url::Url;

use crate::Result;
use crate::credentials::AuthCredentials;
use crate::transport::{HttpTransport, OutgoingRequest};
use crate::types::{AuthProtocolMetadata, ProtectedResourceMetadata};

pub use api_key::ApiKeyProtocol;
pub use mutual_tls::MutualTlsProtocol;
pub use oauth2::OAuth2Protocol;

/// Everything a protocol may need while authenticating
#[derive(Debug, Clone, Copy)]
pub struct AuthenticationContext<'a> {
    /// The protected resource
    pub resource: &'a Url,
    /// What the server advertised for this protocol
    pub protocol: Option<&'a AuthProtocolMetadata>,
    /// The resource's protected resource metadata, if discovered
    pub protected_resource: Option<&'a ProtectedResourceMetadata>,
    /// The caller's transport
    pub transport: &'a dyn HttpTransport,
    /// Bound on each HTTP step
    pub step_timeout: Duration,
    /// Request key-bound tokens from protocols that hold a DPoP key
    pub dpop_enabled: bool,
}

impl<'a> AuthenticationContext<'a> {
    /// Context with nothing discovered
    pub fn new(resource: &'a Url, transport: &'a dyn HttpTransport) -> Self {
        Self {
            resource,
            protocol: None,
            protected_resource: None,
            transport,
            step_timeout: Duration::from_secs(30),
            dpop_enabled: false,
        }
    }
}

/// One authentication scheme
#[async_trait]
pub trait AuthProtocol: Send + Sync + fmt::Debug {
    /// Identifier used in discovery documents and challenges
    fn protocol_id(&self) -> &str;

    /// Protocol version
    fn protocol_version(&self) -> &str {
        "1.0"
    }

    /// How this protocol describes itself in discovery documents
    fn metadata(&self) -> AuthProtocolMetadata {
        AuthProtocolMetadata::new(self.protocol_id(), self.protocol_version())
    }

    /// Obtain credentials
    ///
    /// # Errors
    /// [`crate::AuthError::AuthenticationDenied`] when the user or operator declines,
    /// [`crate::AuthError::Transport`] on network failure
    async fn authenticate(&self, context: &AuthenticationContext<'_>) -> Result<AuthCredentials>;

    /// Attach credentials to a request; no I/O
    ///
    /// # Errors
    /// Returns error if the credentials cannot be expressed as header values
    fn prepare_request(
        &self,
        request: &mut OutgoingRequest,
        credentials: &AuthCredentials,
    ) -> Result<()>;

    /// Local shape and expiry check; no I/O
    fn validate_credentials(&self, credentials: &AuthCredentials) -> bool;

    /// Fetch protocol-specific metadata from `metadata_url`
    ///
    /// # Errors
    /// Returns error on transport failure or an unusable document
    async fn discover_metadata(
        &self,
        _metadata_url: &Url,
        _transport: &dyn HttpTransport,
    ) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }

    /// Proof-of-possession support, if any
    fn dpop(&self) -> Option<&dyn DpopCapability> {
        None
    }

    /// Downcast for the OAuth flow path
    fn as_oauth2(&self) -> Option<&OAuth2Protocol> {
        None
    }
}

/// Key-bound token support
pub trait DpopCapability: Send + Sync {
    /// Whether proofs can be produced right now
    fn supports_dpop(&self) -> bool;

    /// Proof for one request
    ///
    /// # Errors
    /// Returns error if no key is configured or signing fails
    fn generate_proof(
        &self,
        method: &str,
        uri: &str,
        access_token: Option<&str>,
    ) -> Result<DpopProof>;
}
