//! OAuth 2.1 protocol

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use multiauth_dpop::{DpopProof, DpopProofGenerator};
use tracing::debug;
use url::Url;

use super::{AuthProtocol, AuthenticationContext, DpopCapability};
use crate::config::OAuth2ClientConfig;
use crate::credentials::{AuthCredentials, ClientInfo, OAuthToken};
use crate::oauth2::{
    AuthorizationHandler, AuthorizationServerMetadata, FlowParams, OAuthFlow, run_flow,
};
use crate::transport::{HttpTransport, OutgoingRequest, send_with_timeout};
use crate::types::OAUTH2_PROTOCOL;
use crate::{AuthError, Result};

/// OAuth 2.1 with PKCE, optional DPoP binding
pub struct OAuth2Protocol {
    config: OAuth2ClientConfig,
    authorizer: Option<Arc<dyn AuthorizationHandler>>,
    dpop: Option<DpopProofGenerator>,
    flows_started: AtomicUsize,
}

impl OAuth2Protocol {
    /// Protocol for a client configuration
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn new(config: OAuth2ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            authorizer: None,
            dpop: None,
            flows_started: AtomicUsize::new(0),
        })
    }

    /// Handler that presents authorization URLs (code grant)
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn AuthorizationHandler>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Bind tokens to this key
    #[must_use]
    pub fn with_dpop(mut self, generator: DpopProofGenerator) -> Self {
        self.dpop = Some(generator);
        self
    }

    /// Client configuration
    pub fn config(&self) -> &OAuth2ClientConfig {
        &self.config
    }

    /// Authorization handler, if configured
    pub fn authorizer(&self) -> Option<&dyn AuthorizationHandler> {
        self.authorizer.as_deref()
    }

    /// Number of flows (including refreshes) started by this instance
    pub fn flows_started(&self) -> usize {
        self.flows_started.load(Ordering::SeqCst)
    }

    /// Start a flow for the grant the configuration names
    ///
    /// # Errors
    /// Returns error if no authorization server is known for the resource
    pub fn begin_flow(
        &self,
        context: &AuthenticationContext<'_>,
        stored_client: Option<ClientInfo>,
    ) -> Result<OAuthFlow> {
        let params = self.flow_params(context, stored_client)?;
        self.flows_started.fetch_add(1, Ordering::SeqCst);
        debug!(issuer = %params.issuer, grant = self.config.grant.as_str(), "starting oauth flow");
        OAuthFlow::new(params)
    }

    /// Start a refresh flow
    ///
    /// # Errors
    /// Returns error if no authorization server is known for the resource
    pub fn begin_refresh(
        &self,
        context: &AuthenticationContext<'_>,
        stored_client: Option<ClientInfo>,
        refresh_token: &str,
    ) -> Result<OAuthFlow> {
        let params = self.flow_params(context, stored_client)?;
        self.flows_started.fetch_add(1, Ordering::SeqCst);
        debug!(issuer = %params.issuer, "starting token refresh");
        OAuthFlow::refresh(params, refresh_token)
    }

    /// Issuer the flow for `context` will use; also the key for stored client info
    ///
    /// # Errors
    /// Returns error if neither discovery nor configuration names an authorization server
    pub fn issuer_for(&self, context: &AuthenticationContext<'_>) -> Result<Url> {
        self.locate(context).map(|(issuer, _)| issuer)
    }

    fn locate(&self, context: &AuthenticationContext<'_>) -> Result<(Url, Option<Url>)> {
        if let Some(raw) = context.protocol.and_then(|p| p.metadata_url.as_deref()) {
            let url = parse_url("metadata_url", raw)?;
            return Ok(match issuer_from_metadata_url(&url) {
                Some(issuer) => (issuer, Some(url)),
                None => (url, None),
            });
        }
        if let Some(raw) = context
            .protected_resource
            .and_then(|prm| prm.authorization_servers.first())
        {
            return Ok((parse_url("authorization server", raw)?, None));
        }
        if self.config.token_endpoint.is_some() {
            let mut origin = context.resource.clone();
            origin.set_path("/");
            origin.set_query(None);
            return Ok((origin, None));
        }
        Err(AuthError::configuration(format!(
            "no authorization server known for {}",
            context.resource
        )))
    }

    fn flow_params(
        &self,
        context: &AuthenticationContext<'_>,
        stored_client: Option<ClientInfo>,
    ) -> Result<FlowParams> {
        let (issuer, metadata_url) = self.locate(context)?;
        let mut config = self.config.clone();
        if config.scopes.is_empty()
            && let Some(scopes) = context.protocol.and_then(|p| p.scopes.as_ref())
        {
            config.scopes.clone_from(scopes);
        }
        Ok(FlowParams {
            issuer,
            metadata_url,
            resource: context.resource.clone(),
            config,
            stored_client,
            dpop: self.dpop.clone().filter(|_| context.dpop_enabled),
        })
    }
}

fn parse_url(what: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| AuthError::configuration(format!("invalid {what} {raw}: {e}")))
}

/// `https://as/.well-known/oauth-authorization-server/tenant` -> `https://as/tenant`
fn issuer_from_metadata_url(url: &Url) -> Option<Url> {
    let path = url.path();
    let suffix = [
        crate::oauth2::metadata::OAUTH_AS_WELL_KNOWN,
        crate::oauth2::metadata::OIDC_WELL_KNOWN,
    ]
    .iter()
    .find_map(|prefix| path.strip_prefix(prefix))
    .or_else(|| path.strip_suffix(crate::oauth2::metadata::OIDC_WELL_KNOWN))?;

    let mut issuer = url.clone();
    issuer.set_path(if suffix.is_empty() { "/" } else { suffix });
    issuer.set_query(None);
    Some(issuer)
}

impl fmt::Debug for OAuth2Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Protocol")
            .field("config", &self.config)
            .field("authorizer", &self.authorizer.is_some())
            .field("dpop", &self.dpop.is_some())
            .field("flows_started", &self.flows_started())
            .finish()
    }
}

#[async_trait]
impl AuthProtocol for OAuth2Protocol {
    fn protocol_id(&self) -> &str {
        OAUTH2_PROTOCOL
    }

    fn protocol_version(&self) -> &str {
        "2.1"
    }

    async fn authenticate(&self, context: &AuthenticationContext<'_>) -> Result<AuthCredentials> {
        let flow = self.begin_flow(context, None)?;
        let outcome = run_flow(
            flow,
            context.transport,
            self.authorizer(),
            context.step_timeout,
        )
        .await?;
        Ok(outcome.token.into())
    }

    fn prepare_request(
        &self,
        request: &mut OutgoingRequest,
        credentials: &AuthCredentials,
    ) -> Result<()> {
        let token = OAuthToken::try_from(credentials)?;
        let scheme = if token.is_dpop() { "DPoP" } else { "Bearer" };
        request.set_header(
            http::header::AUTHORIZATION.as_str(),
            &format!("{} {}", scheme, token.access_token),
        )
    }

    fn validate_credentials(&self, credentials: &AuthCredentials) -> bool {
        credentials.protocol_id == OAUTH2_PROTOCOL
            && credentials.access_token().is_some_and(|t| !t.is_empty())
            && !credentials.is_expired()
    }

    async fn discover_metadata(
        &self,
        metadata_url: &Url,
        transport: &dyn HttpTransport,
    ) -> Result<Option<serde_json::Value>> {
        let response = send_with_timeout(
            transport,
            OutgoingRequest::get_json(metadata_url.clone()),
            std::time::Duration::from_secs(10),
        )
        .await?;
        debug!(url = %metadata_url, status = %response.status, "authorization server metadata");
        if !response.is_success() {
            return Ok(None);
        }
        let metadata: AuthorizationServerMetadata = response.json()?;
        Ok(Some(serde_json::to_value(metadata)?))
    }

    fn dpop(&self) -> Option<&dyn DpopCapability> {
        Some(self)
    }

    fn as_oauth2(&self) -> Option<&OAuth2Protocol> {
        Some(self)
    }
}

impl DpopCapability for OAuth2Protocol {
    fn supports_dpop(&self) -> bool {
        self.dpop.is_some()
    }

    fn generate_proof(
        &self,
        method: &str,
        uri: &str,
        access_token: Option<&str>,
    ) -> Result<DpopProof> {
        let generator = self
            .dpop
            .as_ref()
            .ok_or_else(|| AuthError::configuration("no DPoP key configured"))?;
        Ok(generator.generate_proof(method, uri, access_token)?)
    }
}
