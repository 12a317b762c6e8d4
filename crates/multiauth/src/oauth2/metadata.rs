//! Authorization server metadata (RFC 8414, OpenID Connect Discovery fallback)

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AuthError, Result};

/// RFC 8414 well-known suffix
pub const OAUTH_AS_WELL_KNOWN: &str = "/.well-known/oauth-authorization-server";
/// OpenID Connect discovery suffix
pub const OIDC_WELL_KNOWN: &str = "/.well-known/openid-configuration";

/// The subset of authorization server metadata the flow engine consumes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Issuer identifier
    pub issuer: String,
    /// Authorization endpoint (required for the code grant)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    /// Token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    /// Dynamic registration endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    /// Token introspection endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,
    /// Supported scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    /// Supported grant types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,
    /// Supported PKCE methods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,
    /// Supported client authentication methods at the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,
    /// DPoP algorithms the server accepts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpop_signing_alg_values_supported: Option<Vec<String>>,
    /// Other members
    #[serde(flatten)]
    pub additional: serde_json::Map<String, serde_json::Value>,
}

impl AuthorizationServerMetadata {
    /// Metadata with only endpoints set, for configured (non-discovered) servers
    pub fn with_endpoints(
        issuer: impl Into<String>,
        authorization_endpoint: Option<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            authorization_endpoint,
            token_endpoint: Some(token_endpoint.into()),
            registration_endpoint: None,
            introspection_endpoint: None,
            scopes_supported: None,
            grant_types_supported: None,
            code_challenge_methods_supported: None,
            token_endpoint_auth_methods_supported: None,
            dpop_signing_alg_values_supported: None,
            additional: serde_json::Map::new(),
        }
    }

    /// Token endpoint as a URL
    ///
    /// # Errors
    /// Returns error if absent or malformed
    pub fn token_url(&self) -> Result<Url> {
        endpoint_url("token_endpoint", self.token_endpoint.as_deref())
    }

    /// Authorization endpoint as a URL
    ///
    /// # Errors
    /// Returns error if absent or malformed
    pub fn authorization_url(&self) -> Result<Url> {
        endpoint_url(
            "authorization_endpoint",
            self.authorization_endpoint.as_deref(),
        )
    }

    /// Registration endpoint as a URL, if advertised
    ///
    /// # Errors
    /// Returns error if present but malformed
    pub fn registration_url(&self) -> Result<Option<Url>> {
        self.registration_endpoint
            .as_deref()
            .map(|raw| endpoint_url("registration_endpoint", Some(raw)))
            .transpose()
    }

    /// Check what a flow needs before it starts
    ///
    /// # Errors
    /// Returns error if the token endpoint is missing, the code grant lacks an
    /// authorization endpoint, or S256 PKCE is not offered
    pub fn validate(&self, needs_authorization_endpoint: bool) -> Result<()> {
        self.token_url()?;
        if needs_authorization_endpoint {
            self.authorization_url()?;
            if let Some(methods) = &self.code_challenge_methods_supported
                && !methods.iter().any(|m| m == "S256")
            {
                return Err(AuthError::configuration(
                    "authorization server does not support S256 PKCE",
                ));
            }
        }
        Ok(())
    }

    /// Whether the server lists an auth method (defaults to `client_secret_basic`)
    pub fn supports_auth_method(&self, method: &str) -> bool {
        match &self.token_endpoint_auth_methods_supported {
            Some(methods) => methods.iter().any(|m| m == method),
            None => method == "client_secret_basic",
        }
    }
}

fn endpoint_url(name: &str, raw: Option<&str>) -> Result<Url> {
    let raw = raw.ok_or_else(|| AuthError::configuration(format!("metadata has no {name}")))?;
    Url::parse(raw).map_err(|e| AuthError::configuration(format!("invalid {name} {raw}: {e}")))
}

/// Well-known metadata locations for an issuer, in lookup order
///
/// For `https://as.example.com/tenant`:
/// 1. `/.well-known/oauth-authorization-server/tenant`
/// 2. `/.well-known/openid-configuration/tenant`
/// 3. `/tenant/.well-known/openid-configuration`
///
/// Root issuers get the first two without a suffix.
pub fn metadata_candidate_urls(issuer: &Url) -> Vec<Url> {
    let path = issuer.path().trim_end_matches('/');
    let mut origin = issuer.clone();
    origin.set_query(None);
    origin.set_fragment(None);

    let at = |suffix: String| {
        let mut url = origin.clone();
        url.set_path(&suffix);
        url
    };

    if path.is_empty() {
        vec![
            at(OAUTH_AS_WELL_KNOWN.to_string()),
            at(OIDC_WELL_KNOWN.to_string()),
        ]
    } else {
        vec![
            at(format!("{OAUTH_AS_WELL_KNOWN}{path}")),
            at(format!("{OIDC_WELL_KNOWN}{path}")),
            at(format!("{path}{OIDC_WELL_KNOWN}")),
        ]
    }
}
