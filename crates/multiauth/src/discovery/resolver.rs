//! Discovery resolver with a per-resource TTL cache

use std::time::{Duration, Instant};

use dashmap::DashMap;
use http::HeaderMap;
use http::header::CACHE_CONTROL;
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{DiscoveryResult, DiscoverySource, prm_urls, unified_discovery_urls};
use crate::challenge::WwwAuthenticate;
use crate::config::DiscoveryConfig;
use crate::transport::{HttpTransport, OutgoingRequest, send_with_timeout};
use crate::types::{
    AuthProtocolMetadata, DiscoveryDocument, OAUTH2_PROTOCOL, ProtectedResourceMetadata,
};
use crate::{AuthError, Result};

#[derive(Debug, Clone)]
struct CacheEntry {
    result: DiscoveryResult,
    expires_at: Instant,
}

/// A fetched document and the lifetime its response allowed
struct Fetched<T> {
    document: T,
    max_age: Option<Duration>,
}

/// Resolves a resource's protocol candidates, caching per resource
#[derive(Debug)]
pub struct DiscoveryResolver {
    config: DiscoveryConfig,
    cache: DashMap<String, CacheEntry>,
}

impl Default for DiscoveryResolver {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default())
    }
}

impl DiscoveryResolver {
    /// Resolver with the given settings
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            cache: DashMap::new(),
        }
    }

    /// Settings in use
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Discover the protocols `resource` supports
    ///
    /// `challenge` is the parsed `WWW-Authenticate` of the 401 that triggered
    /// discovery. Its `resource_metadata` URL is tried first, and its inline protocol
    /// hint, default and preferences take precedence over discovered values. A hint
    /// alone does not make discovery succeed.
    ///
    /// # Errors
    /// Returns [`AuthError::DiscoveryExhausted`] naming the last URL tried
    pub async fn resolve(
        &self,
        resource: &Url,
        challenge: Option<&WwwAuthenticate>,
        transport: &dyn HttpTransport,
    ) -> Result<DiscoveryResult> {
        let key = cache_key(resource);
        if let Some(result) = self.cached(&key) {
            debug!(resource = %key, "discovery cache hit");
            return Ok(merge_challenge(result, challenge));
        }

        let (result, ttl) = self.discover(resource, challenge, transport).await?;
        if !ttl.is_zero() {
            self.cache.insert(
                key,
                CacheEntry {
                    result: result.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
        Ok(merge_challenge(result, challenge))
    }

    /// Drop the cached result for a resource
    pub fn invalidate(&self, resource: &Url) {
        self.cache.remove(&cache_key(resource));
    }

    /// Drop all cached results
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of cached results
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    fn cached(&self, key: &str) -> Option<DiscoveryResult> {
        let hit = self.cache.get(key).and_then(|entry| {
            (Instant::now() < entry.expires_at).then(|| entry.result.clone())
        });
        if hit.is_none() {
            self.cache.remove(key);
        }
        hit
    }

    async fn discover(
        &self,
        resource: &Url,
        challenge: Option<&WwwAuthenticate>,
        transport: &dyn HttpTransport,
    ) -> Result<(DiscoveryResult, Duration)> {
        let mut ttl = self.config.cache_ttl;
        let mut last_url: Option<Url> = None;

        // steps 1-3
        let mut prm_candidates = Vec::new();
        if let Some(raw) = challenge.and_then(|c| c.resource_metadata.as_deref()) {
            match Url::parse(raw) {
                Ok(url) => prm_candidates.push(url),
                Err(e) => warn!(url = raw, error = %e, "ignoring malformed resource_metadata"),
            }
        }
        for url in prm_urls(resource) {
            if !prm_candidates.contains(&url) {
                prm_candidates.push(url);
            }
        }

        let mut prm: Option<(Url, ProtectedResourceMetadata)> = None;
        for url in prm_candidates {
            last_url = Some(url.clone());
            let Some(fetched) = self
                .fetch::<ProtectedResourceMetadata>(&url, transport)
                .await
            else {
                continue;
            };
            if let Err(e) = fetched.document.validate() {
                warn!(url = %url, error = %e, "protected resource metadata rejected");
                continue;
            }
            ttl = self.shorten(ttl, fetched.max_age);
            prm = Some((url, fetched.document));
            break;
        }

        // step 4
        if let Some((url, document)) = &prm
            && let Some(protocols) = document.protocols()
        {
            info!(url = %url, count = protocols.len(), "protocols from protected resource metadata");
            let result = DiscoveryResult {
                protocols: protocols.to_vec(),
                default_protocol: document.mcp_default_auth_protocol.clone(),
                preferences: document
                    .mcp_auth_protocol_preferences
                    .clone()
                    .unwrap_or_default(),
                protected_resource: Some(document.clone()),
                source: DiscoverySource::ProtectedResource {
                    url: url.to_string(),
                },
            };
            return Ok((result, ttl));
        }

        // steps 5-6
        for url in unified_discovery_urls(resource) {
            last_url = Some(url.clone());
            let Some(fetched) = self.fetch::<DiscoveryDocument>(&url, transport).await else {
                continue;
            };
            if let Err(e) = fetched.document.validate() {
                warn!(url = %url, error = %e, "discovery document rejected");
                continue;
            }
            if fetched.document.protocols.is_empty() {
                debug!(url = %url, "discovery document lists no protocols");
                continue;
            }
            ttl = self.shorten(ttl, fetched.max_age);
            info!(url = %url, count = fetched.document.protocols.len(), "protocols from unified discovery");
            let protected_resource = prm.map(|(_, document)| document);
            let document = fetched.document;
            let result = DiscoveryResult {
                default_protocol: document.default_protocol.or_else(|| {
                    protected_resource
                        .as_ref()
                        .and_then(|p| p.mcp_default_auth_protocol.clone())
                }),
                preferences: document
                    .protocol_preferences
                    .or_else(|| {
                        protected_resource
                            .as_ref()
                            .and_then(|p| p.mcp_auth_protocol_preferences.clone())
                    })
                    .unwrap_or_default(),
                protocols: document.protocols,
                protected_resource,
                source: DiscoverySource::UnifiedDiscovery {
                    url: url.to_string(),
                },
            };
            return Ok((result, ttl));
        }

        // step 7
        if let Some((url, document)) = prm
            && let Some(server) = document.authorization_servers.first()
        {
            info!(url = %url, authorization_server = %server, "falling back to oauth2");
            let oauth = AuthProtocolMetadata::new(OAUTH2_PROTOCOL, "2.1")
                .with_metadata_url(server.clone());
            let oauth = match &document.scopes_supported {
                Some(scopes) => oauth.with_scopes(scopes.clone()),
                None => oauth,
            };
            let result = DiscoveryResult {
                protocols: vec![oauth],
                default_protocol: Some(OAUTH2_PROTOCOL.to_string()),
                preferences: Default::default(),
                protected_resource: Some(document),
                source: DiscoverySource::OAuthFallback {
                    url: url.to_string(),
                },
            };
            return Ok((result, ttl));
        }

        // step 8
        let last_url = last_url.map_or_else(|| resource.to_string(), |u| u.to_string());
        warn!(resource = %resource, last_url = %last_url, "authorization discovery exhausted");
        Err(AuthError::DiscoveryExhausted { last_url })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &Url,
        transport: &dyn HttpTransport,
    ) -> Option<Fetched<T>> {
        let response = match send_with_timeout(
            transport,
            OutgoingRequest::get_json(url.clone()),
            self.config.request_timeout,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "discovery request failed");
                return None;
            }
        };
        debug!(url = %url, status = %response.status, "discovery response");
        if !response.is_success() {
            return None;
        }
        trace!(url = %url, body = %response.text(), "discovery body");

        match response.json::<T>() {
            Ok(document) => Some(Fetched {
                document,
                max_age: max_age(&response.headers),
            }),
            Err(e) => {
                warn!(url = %url, error = %e, "malformed discovery document");
                None
            }
        }
    }

    fn shorten(&self, ttl: Duration, max_age: Option<Duration>) -> Duration {
        match max_age {
            Some(max_age) => ttl.min(max_age),
            None => ttl,
        }
    }
}

fn cache_key(resource: &Url) -> String {
    let mut key = resource.origin().ascii_serialization();
    key.push_str(resource.path().trim_end_matches('/'));
    key
}

/// `Cache-Control` lifetime; zero for `no-store`/`no-cache`
fn max_age(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(CACHE_CONTROL)?.to_str().ok()?;
    for directive in value.split(',').map(str::trim) {
        if let Some(seconds) = directive.strip_prefix("max-age=")
            && let Ok(seconds) = seconds.parse::<u64>()
        {
            return Some(Duration::from_secs(seconds));
        }
    }
    if value.contains("no-store") || value.contains("no-cache") {
        return Some(Duration::ZERO);
    }
    None
}

/// Apply a challenge's inline hint, default and preferences over a discovered result
///
/// Hinted protocols come first (in hint order), filled in from discovered entries with
/// the same id; remaining discovered protocols follow.
fn merge_challenge(
    mut result: DiscoveryResult,
    challenge: Option<&WwwAuthenticate>,
) -> DiscoveryResult {
    let Some(challenge) = challenge else {
        return result;
    };

    let hints = challenge.protocol_hints();
    if !hints.is_empty() {
        let mut merged: Vec<AuthProtocolMetadata> = Vec::new();
        for mut hint in hints {
            if merged.iter().any(|p| p.protocol_id == hint.protocol_id) {
                continue;
            }
            if let Some(discovered) = result.protocol(&hint.protocol_id) {
                hint = discovered.clone();
            }
            merged.push(hint);
        }
        for discovered in result.protocols {
            if !merged.iter().any(|p| p.protocol_id == discovered.protocol_id) {
                merged.push(discovered);
            }
        }
        result.protocols = merged;
    }

    if let Some(default) = &challenge.default_protocol {
        result.default_protocol = Some(default.clone());
    }
    result.preferences = result
        .preferences
        .merged_with(&challenge.protocol_preferences);
    result
}
