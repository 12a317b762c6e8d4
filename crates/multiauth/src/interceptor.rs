//! Client auth interceptor
//!
//! Sits between the caller's request loop and its transport. Before a request goes out
//! [`AuthInterceptor::prepare_request`] attaches whatever credentials the store holds;
//! after a response comes back [`AuthInterceptor::handle_response`] decides whether to
//! re-authenticate and retry.
//!
//! ## Single flight
//!
//! Re-authentication is serialized per interceptor. Every completed attempt bumps an
//! epoch; a request remembers the epoch it was prepared under, so a 401 that arrives
//! after someone else already re-authenticated just retries with the new credentials
//! instead of starting a second flow. If the attempt it waited on failed, it gets the
//! same error.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use http::StatusCode;
use http::header::AUTHORIZATION;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::challenge::{ScopeChallenge, WwwAuthenticate};
use crate::config::ClientAuthConfig;
use crate::credentials::{AuthCredentials, OAuthToken, StoredCredentials};
use crate::discovery::DiscoveryResolver;
use crate::oauth2::run_flow;
use crate::protocols::{AuthProtocol, AuthenticationContext, OAuth2Protocol};
use crate::registry::ProtocolRegistry;
use crate::store::CredentialStore;
use crate::transport::{HttpTransport, IncomingResponse, OutgoingRequest};
use crate::types::API_KEY_HEADER;
use crate::{AuthError, Result};
use multiauth_dpop::DPOP_HEADER;

/// A request with the bookkeeping needed to judge its response
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// The request as it should be sent
    pub request: OutgoingRequest,
    /// Protocol whose credentials were attached, if any
    pub protocol_id: Option<String>,
    epoch: u64,
    retried: bool,
}

impl PreparedRequest {
    /// Whether this is the single retry after re-authentication
    pub fn is_retry(&self) -> bool {
        self.retried
    }
}

/// What to do with a response
#[derive(Debug, Clone)]
pub enum ResponseAction {
    /// Hand the response to the caller
    Proceed,
    /// Credentials were refreshed; send this request instead
    Retry(Box<PreparedRequest>),
    /// 403; hand the response to the caller, no retry is attempted
    Forbidden(ScopeChallenge),
}

/// Attaches credentials and re-authenticates on 401
pub struct AuthInterceptor {
    config: ClientAuthConfig,
    resource: Url,
    registry: Arc<ProtocolRegistry>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn HttpTransport>,
    resolver: DiscoveryResolver,
    reauth: Mutex<()>,
    epoch: AtomicU64,
    last_failure: parking_lot::Mutex<Option<(u64, AuthError)>>,
}

impl AuthInterceptor {
    /// Interceptor for the resource named in `config`
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or no protocol is registered
    pub fn new(
        config: ClientAuthConfig,
        registry: Arc<ProtocolRegistry>,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            return Err(AuthError::configuration("no authentication protocols registered"));
        }
        let resource = config.resource()?;
        let resolver = DiscoveryResolver::new(config.discovery.clone());
        Ok(Self {
            config,
            resource,
            registry,
            store,
            transport,
            resolver,
            reauth: Mutex::new(()),
            epoch: AtomicU64::new(0),
            last_failure: parking_lot::Mutex::new(None),
        })
    }

    /// The protected resource
    pub fn resource(&self) -> &Url {
        &self.resource
    }

    /// Discovery resolver (and its cache)
    pub fn resolver(&self) -> &DiscoveryResolver {
        &self.resolver
    }

    /// Completed re-authentication attempts
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn store_key(&self) -> &str {
        self.resource.as_str()
    }

    /// Attach stored credentials, and a DPoP proof when enabled and supported
    ///
    /// Auth headers already on `request` are replaced. With no usable credentials the
    /// request goes out unauthenticated and the server's 401 starts discovery.
    ///
    /// # Errors
    /// Returns error if the store fails or credentials cannot be encoded as headers
    pub async fn prepare_request(&self, request: OutgoingRequest) -> Result<PreparedRequest> {
        self.prepare(request, false).await
    }

    async fn prepare(&self, mut request: OutgoingRequest, retried: bool) -> Result<PreparedRequest> {
        // read the epoch first; credentials read after it are at least that new
        let epoch = self.epoch();
        request.headers.remove(AUTHORIZATION);
        request.headers.remove(API_KEY_HEADER);
        request.headers.remove(DPOP_HEADER);

        let mut protocol_id = None;
        if let Some(record) = self.store.get_credentials(self.store_key()).await?
            && let Some(credentials) = record.usable_at(Utc::now())
        {
            match self.registry.get(&credentials.protocol_id) {
                Some(protocol) if protocol.validate_credentials(&credentials) => {
                    protocol.prepare_request(&mut request, &credentials)?;
                    self.attach_proof(protocol.as_ref(), &mut request, &credentials)?;
                    protocol_id = Some(credentials.protocol_id.clone());
                }
                Some(_) => debug!(protocol = %credentials.protocol_id, "stored credentials failed validation"),
                None => debug!(protocol = %credentials.protocol_id, "stored credentials for unregistered protocol"),
            }
        }

        Ok(PreparedRequest {
            request,
            protocol_id,
            epoch,
            retried,
        })
    }

    fn attach_proof(
        &self,
        protocol: &dyn AuthProtocol,
        request: &mut OutgoingRequest,
        credentials: &AuthCredentials,
    ) -> Result<()> {
        // a DPoP-typed token is unusable without a proof
        if !self.config.dpop_enabled && !credentials.is_dpop_bound() {
            return Ok(());
        }
        let Some(dpop) = protocol.dpop().filter(|d| d.supports_dpop()) else {
            return Ok(());
        };
        let proof = dpop.generate_proof(
            request.method.as_str(),
            request.url.as_str(),
            credentials.access_token(),
        )?;
        request.set_header(DPOP_HEADER, &proof.into_header_value())
    }

    /// Judge a response to a prepared request
    ///
    /// A first 401 re-authenticates (once per interceptor, however many requests see
    /// it) and asks for a retry. A 401 to the retry invalidates the stored credentials
    /// and proceeds. A 403 is reported, never retried.
    ///
    /// # Errors
    /// Returns the re-authentication failure: discovery, selection, flow or store errors
    pub async fn handle_response(
        &self,
        prepared: &PreparedRequest,
        response: &IncomingResponse,
    ) -> Result<ResponseAction> {
        match response.status {
            StatusCode::UNAUTHORIZED if prepared.retried => {
                warn!(resource = %self.resource, "fresh credentials rejected; invalidating");
                self.store.invalidate_credentials(self.store_key()).await?;
                Ok(ResponseAction::Proceed)
            }
            StatusCode::UNAUTHORIZED => {
                let challenge = WwwAuthenticate::from_headers(&response.headers);
                self.reauthenticate_after(prepared.epoch, challenge.as_ref())
                    .await?;
                let retry = self.prepare(prepared.request.clone(), true).await?;
                Ok(ResponseAction::Retry(Box::new(retry)))
            }
            StatusCode::FORBIDDEN => {
                let scope = WwwAuthenticate::from_headers(&response.headers)
                    .map(|c| c.scope_challenge())
                    .unwrap_or_default();
                warn!(
                    resource = %self.resource,
                    error = ?scope.error,
                    scope = ?scope.scope,
                    "request forbidden; not retrying"
                );
                Ok(ResponseAction::Forbidden(scope))
            }
            _ => Ok(ResponseAction::Proceed),
        }
    }

    /// Prepare, send, and retry once on 401
    ///
    /// Non-2xx statuses other than a recoverable 401 come back as responses.
    ///
    /// # Errors
    /// Returns transport failures and re-authentication failures
    pub async fn execute(&self, request: OutgoingRequest) -> Result<IncomingResponse> {
        let mut prepared = self.prepare_request(request).await?;
        loop {
            let response = self.transport.send(prepared.request.clone()).await?;
            match self.handle_response(&prepared, &response).await? {
                ResponseAction::Retry(next) => prepared = *next,
                ResponseAction::Proceed | ResponseAction::Forbidden(_) => return Ok(response),
            }
        }
    }

    /// Re-authenticate unless another request already did since `seen_epoch`
    async fn reauthenticate_after(
        &self,
        seen_epoch: u64,
        challenge: Option<&WwwAuthenticate>,
    ) -> Result<()> {
        let _guard = self.reauth.lock().await;

        let current = self.epoch();
        if current != seen_epoch {
            if let Some((failed_epoch, error)) = self.last_failure.lock().as_ref()
                && *failed_epoch == current
            {
                debug!("re-authentication this request waited on failed");
                return Err(error.clone());
            }
            debug!("credentials refreshed by a concurrent request");
            return Ok(());
        }

        let outcome = self.reauthenticate(challenge).await;
        let next = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        match &outcome {
            Ok(()) => *self.last_failure.lock() = None,
            Err(e) => {
                warn!(resource = %self.resource, error = %e, "re-authentication failed");
                *self.last_failure.lock() = Some((next, e.clone()));
            }
        }
        outcome
    }

    async fn reauthenticate(&self, challenge: Option<&WwwAuthenticate>) -> Result<()> {
        let discovered = self
            .resolver
            .resolve(&self.resource, challenge, self.transport.as_ref())
            .await?;
        let selected = self.registry.select(
            &discovered.candidate_ids(),
            discovered.default_protocol.as_deref(),
            &discovered.preferences,
        )?;
        let protocol = self
            .registry
            .get(&selected)
            .ok_or_else(|| AuthError::UnsupportedProtocol {
                protocol_id: selected.clone(),
            })?;
        info!(resource = %self.resource, protocol = %selected, "authenticating");

        let mut context = AuthenticationContext::new(&self.resource, self.transport.as_ref());
        context.protocol = discovered.protocol(&selected);
        context.protected_resource = discovered.protected_resource.as_ref();
        context.step_timeout = self.config.step_timeout;
        context.dpop_enabled = self.config.dpop_enabled;

        let stored = match protocol.as_oauth2() {
            Some(oauth) => StoredCredentials::OAuth(self.oauth_token(oauth, &context).await?),
            None => StoredCredentials::Protocol(protocol.authenticate(&context).await?),
        };
        self.store
            .store_credentials(self.store_key(), stored)
            .await?;
        debug!(source = ?discovered.source, protocol = %selected, "credentials stored");
        Ok(())
    }

    /// Refresh when a refresh token is stored, otherwise (or on failure) a full flow
    async fn oauth_token(
        &self,
        oauth: &OAuth2Protocol,
        context: &AuthenticationContext<'_>,
    ) -> Result<OAuthToken> {
        let issuer = oauth.issuer_for(context)?;
        let now = Utc::now();
        let client = self
            .store
            .get_client_info(issuer.as_str())
            .await?
            .filter(|client| client.is_valid_at(now));

        let refresh_token = self
            .store
            .get_credentials(self.store_key())
            .await?
            .and_then(|record| record.credentials.to_oauth_token())
            .and_then(|token| token.refresh_token);

        if let Some(refresh_token) = refresh_token {
            let flow = oauth.begin_refresh(context, client.clone(), &refresh_token)?;
            match run_flow(flow, context.transport, None, context.step_timeout).await {
                Ok(outcome) => return Ok(outcome.token),
                Err(e) => debug!(error = %e, "token refresh failed; starting a full flow"),
            }
        }

        let flow = oauth.begin_flow(context, client)?;
        let outcome = run_flow(
            flow,
            context.transport,
            oauth.authorizer(),
            context.step_timeout,
        )
        .await?;
        if let Some(registered) = outcome.registered_client {
            self.store
                .store_client_info(issuer.as_str(), registered)
                .await?;
        }
        Ok(outcome.token)
    }
}

impl fmt::Debug for AuthInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInterceptor")
            .field("resource", &self.resource.as_str())
            .field("protocols", &self.registry.protocol_ids())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}
