//! Client-side discovery of a resource's authentication protocols
//!
//! ## Lookup order
//!
//! 1. `resource_metadata` URL from the 401 challenge
//! 2. `/.well-known/oauth-protected-resource{path}`
//! 3. `/.well-known/oauth-protected-resource`
//! 4. The protected resource metadata's protocol list, if present, ends discovery
//! 5. `/.well-known/authorization_servers{path}`
//! 6. `/.well-known/authorization_servers`
//! 7. OAuth2 alone, using the metadata's authorization servers
//!
//! Results are cached per resource for the configured TTL.

pub mod resolver;

use url::Url;

use crate::types::{
    AuthProtocolMetadata, DISCOVERY_WELL_KNOWN, PRM_WELL_KNOWN, ProtectedResourceMetadata,
    ProtocolPreferences,
};

pub use resolver::DiscoveryResolver;

/// Where a discovery result came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoverySource {
    /// Protocol list embedded in protected resource metadata
    ProtectedResource {
        /// Document URL
        url: String,
    },
    /// Unified `/.well-known/authorization_servers` document
    UnifiedDiscovery {
        /// Document URL
        url: String,
    },
    /// Synthesized OAuth2 entry from the metadata's authorization servers
    OAuthFallback {
        /// Protected resource metadata URL
        url: String,
    },
}

/// Outcome of discovery: candidates plus what OAuth needs downstream
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResult {
    /// Candidate protocols, in server (or challenge hint) order
    pub protocols: Vec<AuthProtocolMetadata>,
    /// Server's default protocol
    pub default_protocol: Option<String>,
    /// Server's protocol priorities
    pub preferences: ProtocolPreferences,
    /// Protected resource metadata, when one was found
    pub protected_resource: Option<ProtectedResourceMetadata>,
    /// Where the protocol list came from
    pub source: DiscoverySource,
}

impl DiscoveryResult {
    /// Candidate ids in order
    pub fn candidate_ids(&self) -> Vec<&str> {
        self.protocols
            .iter()
            .map(|p| p.protocol_id.as_str())
            .collect()
    }

    /// Advertised metadata for one protocol
    pub fn protocol(&self, protocol_id: &str) -> Option<&AuthProtocolMetadata> {
        self.protocols.iter().find(|p| p.protocol_id == protocol_id)
    }
}

/// `{origin}{well_known}{path}`; `None` when the resource has no path
pub(crate) fn path_variant(resource: &Url, well_known: &str) -> Option<Url> {
    let path = resource.path().trim_end_matches('/');
    if path.is_empty() {
        return None;
    }
    Some(at_path(resource, &format!("{well_known}{path}")))
}

/// `{origin}{well_known}`
pub(crate) fn root_variant(resource: &Url, well_known: &str) -> Url {
    at_path(resource, well_known)
}

fn at_path(resource: &Url, path: &str) -> Url {
    let mut url = resource.clone();
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// PRM locations for a resource, path variant first
pub fn prm_urls(resource: &Url) -> Vec<Url> {
    path_variant(resource, PRM_WELL_KNOWN)
        .into_iter()
        .chain(std::iter::once(root_variant(resource, PRM_WELL_KNOWN)))
        .collect()
}

/// Unified discovery locations for a resource, path variant first
pub fn unified_discovery_urls(resource: &Url) -> Vec<Url> {
    path_variant(resource, DISCOVERY_WELL_KNOWN)
        .into_iter()
        .chain(std::iter::once(root_variant(resource, DISCOVERY_WELL_KNOWN)))
        .collect()
}
