//! Configuration types
//!
//! All structs deserialize from any serde format with defaults for omitted fields.
//! Hosts load them however they like; this crate only validates them.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{
    AuthProtocolMetadata, DiscoveryDocument, ProtectedResourceMetadata, ProtocolPreferences,
    ensure_unique_ids,
};
use crate::{AuthError, Result};

/// Client-side interceptor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    /// The protected resource this client talks to
    pub resource_url: String,
    /// Request DPoP-bound tokens and attach proofs when the selected protocol holds a key
    #[serde(default)]
    pub dpop_enabled: bool,
    /// Upper bound on each discovery or flow HTTP step
    #[serde(default = "default_step_timeout")]
    pub step_timeout: Duration,
    /// Discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(30)
}

impl ClientAuthConfig {
    /// Config for a resource with defaults
    pub fn new(resource_url: impl Into<String>) -> Self {
        Self {
            resource_url: resource_url.into(),
            dpop_enabled: false,
            step_timeout: default_step_timeout(),
            discovery: DiscoveryConfig::default(),
        }
    }

    /// Parsed resource URL
    ///
    /// # Errors
    /// Returns error if the URL is not absolute
    pub fn resource(&self) -> Result<Url> {
        Url::parse(&self.resource_url).map_err(|e| {
            AuthError::configuration(format!("invalid resource_url {}: {e}", self.resource_url))
        })
    }

    /// Validate at construction time
    ///
    /// # Errors
    /// Returns error on an invalid resource URL or a zero timeout
    pub fn validate(&self) -> Result<()> {
        self.resource()?;
        if self.step_timeout.is_zero() {
            return Err(AuthError::configuration("step_timeout must be non-zero"));
        }
        self.discovery.validate()
    }
}

/// Discovery cache and fetch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Longest a discovery result is reused; `Cache-Control: max-age` may shorten it
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: Duration,
    /// Timeout for each well-known fetch
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl DiscoveryConfig {
    /// Validate at construction time
    ///
    /// # Errors
    /// Returns error on a zero request timeout
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(AuthError::configuration(
                "discovery request_timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

/// OAuth 2.1 grant the client runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuth2GrantType {
    /// Authorization code with PKCE
    #[default]
    AuthorizationCode,
    /// Client credentials (machine to machine)
    ClientCredentials,
}

impl OAuth2GrantType {
    /// RFC 6749 grant type string
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

/// OAuth 2.1 client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2ClientConfig {
    /// Pre-registered client id; `None` means dynamic registration
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret for confidential clients
    #[serde(
        default,
        serialize_with = "serialize_optional_secret",
        deserialize_with = "deserialize_optional_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<SecretString>,
    /// Redirect URI for the code grant
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Scopes to request
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Grant to run
    #[serde(default)]
    pub grant: OAuth2GrantType,
    /// Name sent during dynamic registration
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Skip metadata discovery and use this authorization endpoint
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    /// Skip metadata discovery and use this token endpoint
    #[serde(default)]
    pub token_endpoint: Option<String>,
}

fn default_redirect_uri() -> String {
    "http://localhost:8765/callback".to_string()
}

fn default_client_name() -> String {
    "multiauth client".to_string()
}

impl Default for OAuth2ClientConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: default_redirect_uri(),
            scopes: Vec::new(),
            grant: OAuth2GrantType::default(),
            client_name: default_client_name(),
            authorization_endpoint: None,
            token_endpoint: None,
        }
    }
}

impl OAuth2ClientConfig {
    /// Client credentials grant for a pre-registered client
    pub fn client_credentials(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_secret: Some(SecretString::new(client_secret.into())),
            grant: OAuth2GrantType::ClientCredentials,
            ..Self::default()
        }
    }

    /// Validate at construction time
    ///
    /// # Errors
    /// Returns error if the client credentials grant lacks a client id, or the
    /// redirect URI is not a URL
    pub fn validate(&self) -> Result<()> {
        if self.grant == OAuth2GrantType::ClientCredentials && self.client_id.is_none() {
            return Err(AuthError::configuration(
                "client_credentials grant requires a pre-configured client_id",
            ));
        }
        Url::parse(&self.redirect_uri).map_err(|e| {
            AuthError::configuration(format!("invalid redirect_uri {}: {e}", self.redirect_uri))
        })?;
        Ok(())
    }
}

fn serialize_optional_secret<S>(
    secret: &Option<SecretString>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match secret {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_optional_secret<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(s.map(SecretString::new))
}

/// What a resource server advertises
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceServerConfig {
    /// Canonical resource URL, including any path
    pub resource_url: String,
    /// Authorization servers issuing tokens for this resource
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    /// Advertised protocols in preference order
    #[serde(default)]
    pub protocols: Vec<AuthProtocolMetadata>,
    /// Default protocol; must be one of `protocols`
    #[serde(default)]
    pub default_protocol: Option<String>,
    /// Protocol priorities
    #[serde(default)]
    pub protocol_preferences: ProtocolPreferences,
    /// Scopes understood by the resource
    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,
    /// Human-readable documentation URL
    #[serde(default)]
    pub resource_documentation: Option<String>,
    /// DPoP algorithms accepted, when a DPoP-capable verifier is configured
    #[serde(default)]
    pub dpop_signing_alg_values_supported: Option<Vec<String>>,
}

impl ResourceServerConfig {
    /// Config with a resource URL and nothing advertised
    pub fn new(resource_url: impl Into<String>) -> Self {
        Self {
            resource_url: resource_url.into(),
            authorization_servers: Vec::new(),
            protocols: Vec::new(),
            default_protocol: None,
            protocol_preferences: ProtocolPreferences::new(),
            scopes_supported: None,
            resource_documentation: None,
            dpop_signing_alg_values_supported: None,
        }
    }

    /// Add an authorization server
    #[must_use]
    pub fn with_authorization_server(mut self, url: impl Into<String>) -> Self {
        self.authorization_servers.push(url.into());
        self
    }

    /// Add an advertised protocol
    #[must_use]
    pub fn with_protocol(mut self, protocol: AuthProtocolMetadata) -> Self {
        self.protocols.push(protocol);
        self
    }

    /// Set the default protocol
    #[must_use]
    pub fn with_default_protocol(mut self, id: impl Into<String>) -> Self {
        self.default_protocol = Some(id.into());
        self
    }

    /// Set protocol priorities
    #[must_use]
    pub fn with_preferences(mut self, preferences: ProtocolPreferences) -> Self {
        self.protocol_preferences = preferences;
        self
    }

    /// Parsed resource URL
    ///
    /// # Errors
    /// Returns error if the URL is empty or not absolute
    pub fn resource(&self) -> Result<Url> {
        if self.resource_url.trim().is_empty() {
            return Err(AuthError::configuration("resource_url must not be empty"));
        }
        Url::parse(&self.resource_url).map_err(|e| {
            AuthError::configuration(format!("invalid resource_url {}: {e}", self.resource_url))
        })
    }

    /// Validate at startup
    ///
    /// # Errors
    /// Returns error on an empty resource URL, duplicate protocol ids, a default
    /// protocol that is not advertised, or nothing advertised at all
    pub fn validate(&self) -> Result<()> {
        self.resource()?;
        ensure_unique_ids(&self.protocols)?;
        if let Some(default) = &self.default_protocol
            && !self.protocols.iter().any(|p| &p.protocol_id == default)
        {
            return Err(AuthError::configuration(format!(
                "default protocol '{default}' is not in the advertised protocol list"
            )));
        }
        if self.protocols.is_empty() && self.authorization_servers.is_empty() {
            return Err(AuthError::configuration(
                "a resource server must advertise an authorization server or a protocol",
            ));
        }
        Ok(())
    }

    /// The RFC 9728 document this config describes
    pub fn protected_resource_metadata(&self) -> ProtectedResourceMetadata {
        let mut prm = ProtectedResourceMetadata::new(self.resource_url.clone());
        prm.authorization_servers.clone_from(&self.authorization_servers);
        prm.scopes_supported.clone_from(&self.scopes_supported);
        prm.bearer_methods_supported = Some(vec!["header".to_string()]);
        prm.resource_documentation.clone_from(&self.resource_documentation);
        prm.dpop_signing_alg_values_supported
            .clone_from(&self.dpop_signing_alg_values_supported);
        if !self.protocols.is_empty() {
            prm.mcp_auth_protocols = Some(self.protocols.clone());
        }
        prm.mcp_default_auth_protocol.clone_from(&self.default_protocol);
        if !self.protocol_preferences.is_empty() {
            prm.mcp_auth_protocol_preferences = Some(self.protocol_preferences.clone());
        }
        prm
    }

    /// The unified discovery document this config describes
    pub fn discovery_document(&self) -> DiscoveryDocument {
        DiscoveryDocument {
            protocols: self.protocols.clone(),
            default_protocol: self.default_protocol.clone(),
            protocol_preferences: (!self.protocol_preferences.is_empty())
                .then(|| self.protocol_preferences.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_config_defaults() {
        let config: ClientAuthConfig =
            serde_json::from_value(json!({"resource_url": "https://api.example.com/mcp"})).unwrap();
        assert!(!config.dpop_enabled);
        assert_eq!(config.discovery.cache_ttl, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oauth_config_secret_round_trip_and_redaction() {
        let config: OAuth2ClientConfig = serde_json::from_value(json!({
            "client_id": "abc",
            "client_secret": "s3cr3t",
            "grant": "client_credentials"
        }))
        .unwrap();
        assert_eq!(config.grant, OAuth2GrantType::ClientCredentials);
        assert!(!format!("{:?}", config).contains("s3cr3t"));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["client_secret"], "s3cr3t");
    }

    #[test]
    fn test_client_credentials_requires_client_id() {
        let config = OAuth2ClientConfig {
            grant: OAuth2GrantType::ClientCredentials,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AuthError::Configuration { .. })
        ));
    }

    #[test]
    fn test_resource_server_rejects_unknown_default() {
        let config = ResourceServerConfig::new("https://api.example.com/mcp")
            .with_protocol(AuthProtocolMetadata::new("api_key", "1.0"))
            .with_default_protocol("oauth2");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resource_server_rejects_empty_url() {
        let config = ResourceServerConfig::new("")
            .with_authorization_server("https://auth.example.com");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resource_server_rejects_duplicates() {
        let config = ResourceServerConfig::new("https://api.example.com")
            .with_protocol(AuthProtocolMetadata::new("api_key", "1.0"))
            .with_protocol(AuthProtocolMetadata::new("api_key", "2.0"));
        assert!(matches!(
            config.validate(),
            Err(AuthError::DuplicateProtocol { .. })
        ));
    }

    #[test]
    fn test_documents_from_config() {
        let config = ResourceServerConfig::new("https://api.example.com/mcp")
            .with_authorization_server("https://auth.example.com")
            .with_protocol(AuthProtocolMetadata::new("oauth2", "2.1"))
            .with_protocol(AuthProtocolMetadata::new("api_key", "1.0"))
            .with_default_protocol("oauth2")
            .with_preferences(ProtocolPreferences::new().with("oauth2", 1).with("api_key", 2));
        assert!(config.validate().is_ok());

        let prm = config.protected_resource_metadata();
        assert!(prm.validate().is_ok());
        assert_eq!(prm.protocols().map(<[_]>::len), Some(2));

        let doc = config.discovery_document();
        assert_eq!(doc.default_protocol.as_deref(), Some("oauth2"));
        assert_eq!(doc.protocol_preferences.unwrap().get("api_key"), Some(2));
    }
}
