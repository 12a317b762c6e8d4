//! Metadata route builders
//!
//! Pure data shaping: a [`ResourceServerConfig`] in, the well-known documents (and the
//! paths to serve them at) out. Mount the result on whatever HTTP server is in use.

use bytes::Bytes;
use url::Url;

use crate::Result;
use crate::challenge::WwwAuthenticateBuilder;
use crate::config::ResourceServerConfig;
use crate::discovery::{path_variant, root_variant};
use crate::types::{DISCOVERY_WELL_KNOWN, PRM_WELL_KNOWN};

const JSON: &str = "application/json";

/// One document to serve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRoute {
    /// Request path
    pub path: String,
    /// Response content type
    pub content_type: &'static str,
    /// Response body
    pub body: Bytes,
}

fn serving_path(resource_url: &str, well_known: &str) -> Result<String> {
    let resource = ResourceServerConfig::new(resource_url).resource()?;
    Ok(path_variant(&resource, well_known)
        .unwrap_or_else(|| root_variant(&resource, well_known))
        .path()
        .to_string())
}

/// `/.well-known/oauth-protected-resource{path}` for a resource URL
///
/// # Errors
/// Returns error if the URL does not parse
pub fn prm_well_known_path(resource_url: &str) -> Result<String> {
    serving_path(resource_url, PRM_WELL_KNOWN)
}

/// `/.well-known/authorization_servers{path}` for a resource URL
///
/// # Errors
/// Returns error if the URL does not parse
pub fn discovery_well_known_path(resource_url: &str) -> Result<String> {
    serving_path(resource_url, DISCOVERY_WELL_KNOWN)
}

/// Serialized protected resource metadata
///
/// # Errors
/// Returns error if the configuration is invalid
pub fn protected_resource_metadata(config: &ResourceServerConfig) -> Result<Bytes> {
    config.validate()?;
    Ok(Bytes::from(serde_json::to_vec(
        &config.protected_resource_metadata(),
    )?))
}

/// Serialized unified discovery document
///
/// # Errors
/// Returns error if the configuration is invalid
pub fn discovery_document(config: &ResourceServerConfig) -> Result<Bytes> {
    config.validate()?;
    Ok(Bytes::from(serde_json::to_vec(&config.discovery_document())?))
}

/// Every well-known route for a resource, plus its 401 challenge
#[derive(Debug, Clone)]
pub struct MetadataRoutes {
    routes: Vec<MetadataRoute>,
    challenge: WwwAuthenticateBuilder,
}

impl MetadataRoutes {
    /// Routes for `config`
    ///
    /// Protected resource metadata is served at the path-relative and root locations.
    /// The unified discovery document is served the same way when protocols are
    /// advertised.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn from_config(config: &ResourceServerConfig) -> Result<Self> {
        let resource = config.resource()?;
        let mut routes = Vec::new();

        let prm = protected_resource_metadata(config)?;
        let prm_url = push_variants(&mut routes, &resource, PRM_WELL_KNOWN, &prm);
        if !config.protocols.is_empty() {
            let document = discovery_document(config)?;
            push_variants(&mut routes, &resource, DISCOVERY_WELL_KNOWN, &document);
        }

        let mut challenge = WwwAuthenticateBuilder::new()
            .with_resource_metadata(prm_url.as_str())
            .with_auth_protocols(config.protocols.iter().map(|p| p.protocol_id.clone()))
            .with_preferences(config.protocol_preferences.clone());
        if let Some(default) = &config.default_protocol {
            challenge = challenge.with_default_protocol(default.clone());
        }
        if let Some(scopes) = &config.scopes_supported {
            challenge = challenge.with_scope(scopes.join(" "));
        }

        Ok(Self { routes, challenge })
    }

    /// All routes
    pub fn routes(&self) -> &[MetadataRoute] {
        &self.routes
    }

    /// Route for a request path
    pub fn get(&self, path: &str) -> Option<&MetadataRoute> {
        self.routes.iter().find(|route| route.path == path)
    }

    /// The 401 challenge advertising these documents
    pub fn challenge(&self) -> &WwwAuthenticateBuilder {
        &self.challenge
    }
}

impl IntoIterator for MetadataRoutes {
    type Item = MetadataRoute;
    type IntoIter = std::vec::IntoIter<MetadataRoute>;

    fn into_iter(self) -> Self::IntoIter {
        self.routes.into_iter()
    }
}

/// Push path-relative and root routes; returns the preferred document URL
fn push_variants(
    routes: &mut Vec<MetadataRoute>,
    resource: &Url,
    well_known: &str,
    body: &Bytes,
) -> Url {
    let root = root_variant(resource, well_known);
    let preferred = path_variant(resource, well_known);
    for url in preferred.iter().chain(std::iter::once(&root)) {
        routes.push(MetadataRoute {
            path: url.path().to_string(),
            content_type: JSON,
            body: body.clone(),
        });
    }
    preferred.unwrap_or(root)
}
