//! Wire types shared by clients and resource servers
//!
//! - [`AuthProtocolMetadata`] - one advertised authentication scheme
//! - [`ProtocolPreferences`] - priority map, lower value wins
//! - [`ProtectedResourceMetadata`] - RFC 9728 document with protocol extensions
//! - [`DiscoveryDocument`] - unified `/.well-known/authorization_servers` response

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{AuthError, Result};

/// Protocol id for OAuth 2.1
pub const OAUTH2_PROTOCOL: &str = "oauth2";
/// Protocol id for API keys
pub const API_KEY_PROTOCOL: &str = "api_key";
/// Protocol id for mutual TLS
pub const MUTUAL_TLS_PROTOCOL: &str = "mutual_tls";

/// Well-known suffix for RFC 9728 protected resource metadata
pub const PRM_WELL_KNOWN: &str = "/.well-known/oauth-protected-resource";
/// Well-known suffix for the unified protocol discovery document
pub const DISCOVERY_WELL_KNOWN: &str = "/.well-known/authorization_servers";

/// Header carrying API keys
pub const API_KEY_HEADER: &str = "x-api-key";

/// One authentication scheme as advertised by a resource server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProtocolMetadata {
    /// Protocol identifier (e.g. `oauth2`, `api_key`)
    pub protocol_id: String,
    /// Protocol version
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Where protocol-specific metadata lives (e.g. AS metadata for OAuth2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_url: Option<String>,
    /// Scopes relevant to this protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    /// Extension members
    #[serde(flatten)]
    pub additional: serde_json::Map<String, serde_json::Value>,
}

fn default_protocol_version() -> String {
    "1.0".to_string()
}

impl AuthProtocolMetadata {
    /// Metadata with just an id and version
    pub fn new(protocol_id: impl Into<String>, protocol_version: impl Into<String>) -> Self {
        Self {
            protocol_id: protocol_id.into(),
            protocol_version: protocol_version.into(),
            metadata_url: None,
            scopes: None,
            additional: serde_json::Map::new(),
        }
    }

    /// Set the metadata URL
    #[must_use]
    pub fn with_metadata_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_url = Some(url.into());
        self
    }

    /// Set the scopes
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// Fill absent optional members from `other` (same protocol id assumed)
    pub(crate) fn fill_from(&mut self, other: &Self) {
        if self.metadata_url.is_none() {
            self.metadata_url.clone_from(&other.metadata_url);
        }
        if self.scopes.is_none() {
            self.scopes.clone_from(&other.scopes);
        }
        for (key, value) in &other.additional {
            self.additional
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Reject protocol lists that advertise an id twice
pub(crate) fn ensure_unique_ids(protocols: &[AuthProtocolMetadata]) -> Result<()> {
    let mut seen = HashSet::new();
    for protocol in protocols {
        if !seen.insert(protocol.protocol_id.as_str()) {
            return Err(AuthError::DuplicateProtocol {
                protocol_id: protocol.protocol_id.clone(),
            });
        }
    }
    Ok(())
}

/// Priority per protocol id; lower value means preferred, absent means least preferred
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolPreferences(BTreeMap<String, i64>);

impl ProtocolPreferences {
    /// Empty preference map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a priority
    #[must_use]
    pub fn with(mut self, protocol_id: impl Into<String>, priority: i64) -> Self {
        self.0.insert(protocol_id.into(), priority);
        self
    }

    /// Add or replace a priority in place
    pub fn insert(&mut self, protocol_id: impl Into<String>, priority: i64) {
        self.0.insert(protocol_id.into(), priority);
    }

    /// Priority for an id
    pub fn get(&self, protocol_id: &str) -> Option<i64> {
        self.0.get(protocol_id).copied()
    }

    /// Whether no priorities are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries ordered by priority, then id
    pub fn ranked(&self) -> Vec<(&str, i64)> {
        let mut entries: Vec<_> = self.0.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(b.0)));
        entries
    }

    /// Overlay `other` on top of `self`; entries in `other` win
    pub fn merged_with(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (id, priority) in &other.0 {
            merged.0.insert(id.clone(), *priority);
        }
        merged
    }

    /// Parse the challenge form `oauth2:1,api_key:2`; malformed pairs are skipped
    pub fn parse_challenge_value(value: &str) -> Self {
        let mut prefs = Self::new();
        for pair in value.split(',') {
            let Some((id, priority)) = pair.trim().split_once(':') else {
                continue;
            };
            if let Ok(priority) = priority.trim().parse::<i64>()
                && !id.trim().is_empty()
            {
                prefs.insert(id.trim(), priority);
            }
        }
        prefs
    }

    /// Render the challenge form, ordered by priority
    pub fn to_challenge_value(&self) -> String {
        self.ranked()
            .into_iter()
            .map(|(id, priority)| format!("{}:{}", id, priority))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for ProtocolPreferences {
    fn from_iter<T: IntoIterator<Item = (S, i64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// RFC 9728 protected resource metadata, with multi-protocol extension members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Resource identifier (URL)
    pub resource: String,
    /// Authorization servers able to issue tokens for this resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorization_servers: Vec<String>,
    /// Scopes the resource understands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    /// How bearer tokens may be sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<String>>,
    /// Human-readable documentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_documentation: Option<String>,
    /// DPoP algorithms the resource accepts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpop_signing_alg_values_supported: Option<Vec<String>>,
    /// Extension: supported authentication protocols
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_auth_protocols: Option<Vec<AuthProtocolMetadata>>,
    /// Extension: default protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_default_auth_protocol: Option<String>,
    /// Extension: protocol priorities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_auth_protocol_preferences: Option<ProtocolPreferences>,
    /// Other members
    #[serde(flatten)]
    pub additional: serde_json::Map<String, serde_json::Value>,
}

impl ProtectedResourceMetadata {
    /// Minimal document for a resource
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            authorization_servers: Vec::new(),
            scopes_supported: None,
            bearer_methods_supported: None,
            resource_documentation: None,
            dpop_signing_alg_values_supported: None,
            mcp_auth_protocols: None,
            mcp_default_auth_protocol: None,
            mcp_auth_protocol_preferences: None,
            additional: serde_json::Map::new(),
        }
    }

    /// Advertised protocol list, if the extension is present and non-empty
    pub fn protocols(&self) -> Option<&[AuthProtocolMetadata]> {
        self.mcp_auth_protocols
            .as_deref()
            .filter(|protocols| !protocols.is_empty())
    }

    /// Check structural invariants
    ///
    /// # Errors
    /// Returns error if neither authorization servers nor a protocol list is present,
    /// or if a protocol id repeats
    pub fn validate(&self) -> Result<()> {
        if self.authorization_servers.is_empty() && self.protocols().is_none() {
            return Err(AuthError::configuration(
                "protected resource metadata needs an authorization server or a protocol list",
            ));
        }
        if let Some(protocols) = &self.mcp_auth_protocols {
            ensure_unique_ids(protocols)?;
        }
        Ok(())
    }
}

/// Unified discovery document served at `/.well-known/authorization_servers`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// Supported protocols in server order
    #[serde(default)]
    pub protocols: Vec<AuthProtocolMetadata>,
    /// Default protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_protocol: Option<String>,
    /// Protocol priorities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_preferences: Option<ProtocolPreferences>,
}

impl DiscoveryDocument {
    /// Check structural invariants
    ///
    /// # Errors
    /// Returns error if a protocol id repeats
    pub fn validate(&self) -> Result<()> {
        ensure_unique_ids(&self.protocols)
    }
}
