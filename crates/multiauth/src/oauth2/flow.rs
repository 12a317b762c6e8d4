//! OAuth 2.1 flow engine
//!
//! [`OAuthFlow`] is a suspend/resume state machine. It never performs I/O itself:
//! [`OAuthFlow::next_action`] yields the request to send (or the authorization URL to
//! present) and the caller resumes it with [`OAuthFlow::advance`] or
//! [`OAuthFlow::deliver_callback`]. Every request therefore travels over whatever
//! connection the caller already owns.
//!
//! ```text
//! code grant:         Start -> AsMetadataFetched -> [Registered] -> AuthorizationRequested
//!                           -> CallbackReceived -> TokenExchanged -> Done
//! client credentials: Start -> AsMetadataFetched -> TokenExchanged -> Done
//! refresh:            Start -> AsMetadataFetched -> TokenExchanged -> Done
//! ```
//!
//! Any failure moves the machine to `Failed` and discards everything it had gathered.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use http::header::AUTHORIZATION;
use http::HeaderValue;
use multiauth_dpop::{DPOP_HEADER, DpopProofGenerator};
use oauth2::{CsrfToken, PkceCodeChallenge, PkceCodeVerifier};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use url::Url;

use super::metadata::{AuthorizationServerMetadata, metadata_candidate_urls};
use super::registration::{RegistrationRequest, RegistrationResponse};
use super::token::{TokenResponse, describe_failure};
use crate::config::{OAuth2ClientConfig, OAuth2GrantType};
use crate::credentials::{ClientInfo, OAuthToken};
use crate::transport::{HttpTransport, IncomingResponse, OutgoingRequest, send_with_timeout};
use crate::{AuthError, Result};

/// Flow step, used to name where a flow failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStep {
    /// Fetching authorization server metadata
    AsMetadata,
    /// Dynamic client registration
    Registration,
    /// Presenting the authorization URL
    Authorization,
    /// Receiving the redirect
    Callback,
    /// Calling the token endpoint
    TokenExchange,
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AsMetadata => "as_metadata",
            Self::Registration => "registration",
            Self::Authorization => "authorization",
            Self::Callback => "callback",
            Self::TokenExchange => "token_exchange",
        })
    }
}

/// Where the machine is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Looking for authorization server metadata
    Start,
    /// Metadata known
    AsMetadataFetched,
    /// Client id known (configured, stored or just registered)
    Registered,
    /// Waiting for the authorization callback
    AuthorizationRequested,
    /// Authorization code received
    CallbackReceived,
    /// Token obtained
    TokenExchanged,
    /// Finished successfully
    Done,
    /// Finished unsuccessfully
    Failed,
}

/// URL the resource owner must visit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Full authorization URL including PKCE challenge and state
    pub url: Url,
    /// The `state` value the callback must echo
    pub state: String,
}

/// What the authorization redirect delivered
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCallback {
    /// Authorization code
    pub code: String,
    /// Echoed `state`
    pub state: String,
}

impl fmt::Debug for AuthorizationCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationCallback")
            .field("code", &"[REDACTED]")
            .field("state", &self.state)
            .finish()
    }
}

/// What the caller should do next
#[derive(Debug)]
pub enum FlowAction {
    /// Send this request and resume with [`OAuthFlow::advance`]
    Send(OutgoingRequest),
    /// Present this URL and resume with [`OAuthFlow::deliver_callback`] or [`OAuthFlow::deny`]
    Authorize(AuthorizationRequest),
    /// The flow produced a token
    Done(OAuthToken),
    /// The flow failed; the error is always [`AuthError::OAuthFlowFailed`]
    Failed(AuthError),
}

/// Presents authorization URLs and returns the redirect's parameters
#[async_trait]
pub trait AuthorizationHandler: Send + Sync + fmt::Debug {
    /// Send the user to `request.url` and wait for the callback
    ///
    /// # Errors
    /// Returns [`AuthError::AuthenticationDenied`] if the user declines
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<AuthorizationCallback>;
}

/// Inputs a flow is built from
#[derive(Debug, Clone)]
pub struct FlowParams {
    /// Authorization server issuer
    pub issuer: Url,
    /// Explicit metadata location, tried before the well-known candidates
    pub metadata_url: Option<Url>,
    /// Resource the token is for (RFC 8707)
    pub resource: Url,
    /// Client settings
    pub config: OAuth2ClientConfig,
    /// Previously registered client for this issuer
    pub stored_client: Option<ClientInfo>,
    /// Proof generator when DPoP is enabled
    pub dpop: Option<DpopProofGenerator>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Grant {
    AuthorizationCode,
    ClientCredentials,
    Refresh(String),
}

/// The flow state machine
pub struct OAuthFlow {
    state: FlowState,
    grant: Grant,
    resource: Url,
    config: OAuth2ClientConfig,
    client: Option<ClientInfo>,
    registered: bool,
    dpop: Option<DpopProofGenerator>,
    candidates: VecDeque<Url>,
    last_metadata_url: Option<Url>,
    metadata: Option<AuthorizationServerMetadata>,
    pkce_challenge: Option<PkceCodeChallenge>,
    pkce_verifier: Option<PkceCodeVerifier>,
    csrf_state: String,
    authorization: Option<AuthorizationRequest>,
    code: Option<String>,
    pending: Option<(FlowStep, OutgoingRequest)>,
    token: Option<OAuthToken>,
    error: Option<AuthError>,
}

impl OAuthFlow {
    /// Flow for the grant `params.config` names
    ///
    /// # Errors
    /// Returns [`AuthError::Configuration`] when the client credentials grant has no
    /// client, or explicit endpoints are unusable
    pub fn new(params: FlowParams) -> Result<Self> {
        let grant = match params.config.grant {
            OAuth2GrantType::AuthorizationCode => Grant::AuthorizationCode,
            OAuth2GrantType::ClientCredentials => Grant::ClientCredentials,
        };
        Self::build(params, grant)
    }

    /// Refresh flow for an existing refresh token
    ///
    /// # Errors
    /// Returns [`AuthError::Configuration`] when explicit endpoints are unusable
    pub fn refresh(params: FlowParams, refresh_token: impl Into<String>) -> Result<Self> {
        Self::build(params, Grant::Refresh(refresh_token.into()))
    }

    fn build(params: FlowParams, grant: Grant) -> Result<Self> {
        let FlowParams {
            issuer,
            metadata_url,
            resource,
            config,
            stored_client,
            dpop,
        } = params;

        let client = match &config.client_id {
            Some(client_id) => Some(ClientInfo {
                client_id: client_id.clone(),
                client_secret: config.client_secret.clone(),
                token_endpoint_auth_method: None,
                client_secret_expires_at: None,
            }),
            None => stored_client.filter(|client| client.is_valid_at(Utc::now())),
        };
        if grant == Grant::ClientCredentials && client.is_none() {
            return Err(AuthError::configuration(
                "client_credentials grant requires a pre-configured client_id",
            ));
        }

        let mut candidates = VecDeque::new();
        for url in metadata_url.into_iter().chain(metadata_candidate_urls(&issuer)) {
            if !candidates.contains(&url) {
                candidates.push_back(url);
            }
        }

        let mut state = FlowState::Start;
        let mut metadata = None;
        if let Some(token_endpoint) = &config.token_endpoint {
            let configured = AuthorizationServerMetadata::with_endpoints(
                issuer.as_str(),
                config.authorization_endpoint.clone(),
                token_endpoint.clone(),
            );
            configured.validate(grant == Grant::AuthorizationCode)?;
            metadata = Some(configured);
            state = FlowState::AsMetadataFetched;
        }

        let (pkce_challenge, pkce_verifier) = if grant == Grant::AuthorizationCode {
            let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
            (Some(challenge), Some(verifier))
        } else {
            (None, None)
        };

        Ok(Self {
            state,
            grant,
            resource,
            config,
            client,
            registered: false,
            dpop,
            candidates,
            last_metadata_url: None,
            metadata,
            pkce_challenge,
            pkce_verifier,
            csrf_state: CsrfToken::new_random().secret().clone(),
            authorization: None,
            code: None,
            pending: None,
            token: None,
            error: None,
        })
    }

    /// Current state
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// The step the machine is on (or failed at)
    pub fn current_step(&self) -> FlowStep {
        if let Some((step, _)) = &self.pending {
            return *step;
        }
        match self.state {
            FlowState::Start => FlowStep::AsMetadata,
            FlowState::AsMetadataFetched if self.client.is_none() => FlowStep::Registration,
            FlowState::AsMetadataFetched | FlowState::Registered => FlowStep::Authorization,
            FlowState::AuthorizationRequested => FlowStep::Callback,
            FlowState::CallbackReceived
            | FlowState::TokenExchanged
            | FlowState::Done
            | FlowState::Failed => FlowStep::TokenExchange,
        }
    }

    /// Client registered during this flow, for the caller to persist
    pub fn registered_client(&self) -> Option<&ClientInfo> {
        self.client.as_ref().filter(|_| self.registered)
    }

    /// Authorization server metadata, once known
    pub fn metadata(&self) -> Option<&AuthorizationServerMetadata> {
        self.metadata.as_ref()
    }

    /// Decide what happens next
    pub fn next_action(&mut self) -> FlowAction {
        if let Some((_, request)) = &self.pending {
            return FlowAction::Send(request.clone());
        }

        loop {
            match self.state {
                FlowState::Start => {
                    let Some(url) = self.candidates.pop_front() else {
                        let last = self
                            .last_metadata_url
                            .as_ref()
                            .map_or_else(|| "none".to_string(), Url::to_string);
                        self.fail(
                            FlowStep::AsMetadata,
                            format!("no authorization server metadata found (last tried {last})"),
                        );
                        continue;
                    };
                    debug!(url = %url, "fetching authorization server metadata");
                    self.last_metadata_url = Some(url.clone());
                    return self.send(FlowStep::AsMetadata, OutgoingRequest::get_json(url));
                }
                FlowState::AsMetadataFetched => {
                    if self.grant != Grant::AuthorizationCode {
                        match self.token_request() {
                            Ok(request) => return self.send(FlowStep::TokenExchange, request),
                            Err(detail) => self.fail(FlowStep::TokenExchange, detail),
                        }
                    } else if self.client.is_none() {
                        match self.registration_request() {
                            Ok(request) => return self.send(FlowStep::Registration, request),
                            Err(detail) => self.fail(FlowStep::Registration, detail),
                        }
                    } else {
                        self.state = FlowState::Registered;
                    }
                }
                FlowState::Registered => match self.authorization_request() {
                    Ok(request) => {
                        self.state = FlowState::AuthorizationRequested;
                        self.authorization = Some(request.clone());
                        return FlowAction::Authorize(request);
                    }
                    Err(detail) => self.fail(FlowStep::Authorization, detail),
                },
                FlowState::AuthorizationRequested => {
                    if let Some(request) = &self.authorization {
                        return FlowAction::Authorize(request.clone());
                    }
                    self.fail(FlowStep::Authorization, "authorization request lost".into());
                }
                FlowState::CallbackReceived => match self.token_request() {
                    Ok(request) => return self.send(FlowStep::TokenExchange, request),
                    Err(detail) => self.fail(FlowStep::TokenExchange, detail),
                },
                FlowState::TokenExchanged => self.state = FlowState::Done,
                FlowState::Done => {
                    if let Some(token) = &self.token {
                        return FlowAction::Done(token.clone());
                    }
                    self.fail(FlowStep::TokenExchange, "token missing after exchange".into());
                }
                FlowState::Failed => {
                    return FlowAction::Failed(self.error.clone().unwrap_or_else(|| {
                        AuthError::OAuthFlowFailed {
                            step: FlowStep::AsMetadata,
                            detail: "flow failed".into(),
                        }
                    }));
                }
            }
        }
    }

    /// Resume with the response to the last [`FlowAction::Send`]
    pub fn advance(&mut self, response: IncomingResponse) {
        let Some((step, _)) = self.pending.take() else {
            let step = self.current_step();
            self.fail(step, "response received with no request outstanding".into());
            return;
        };
        debug!(step = %step, status = %response.status, "oauth flow response");

        match step {
            FlowStep::AsMetadata => self.on_metadata(response),
            FlowStep::Registration => self.on_registration(response),
            FlowStep::TokenExchange => self.on_token(response),
            FlowStep::Authorization | FlowStep::Callback => {
                self.fail(step, "unexpected HTTP response".into());
            }
        }
    }

    /// Resume with the authorization redirect's parameters
    pub fn deliver_callback(&mut self, callback: AuthorizationCallback) {
        if self.state != FlowState::AuthorizationRequested {
            self.fail(FlowStep::Callback, "callback delivered out of order".into());
            return;
        }
        let matches: bool = callback
            .state
            .as_bytes()
            .ct_eq(self.csrf_state.as_bytes())
            .into();
        if !matches {
            self.fail(FlowStep::Callback, "state parameter mismatch".into());
            return;
        }
        if callback.code.is_empty() {
            self.fail(FlowStep::Callback, "callback carried no authorization code".into());
            return;
        }
        self.code = Some(callback.code);
        self.state = FlowState::CallbackReceived;
    }

    /// The user or handler declined to authorize
    pub fn deny(&mut self, reason: impl fmt::Display) {
        self.fail(FlowStep::Authorization, format!("authorization declined: {reason}"));
    }

    /// The last [`FlowAction::Send`] got no response (transport failure or timeout)
    ///
    /// An unreachable metadata candidate counts as a miss, like a 404, and the remaining
    /// candidates are still tried. At any other step the flow aborts.
    pub fn send_failed(&mut self, error: &AuthError) {
        if let Some((FlowStep::AsMetadata, request)) = &self.pending {
            debug!(url = %request.url, error = %error, "metadata candidate unreachable");
            self.pending = None;
            return;
        }
        self.abort(error);
    }

    /// Terminate the flow at its current step (transport failure, timeout, cancellation)
    pub fn abort(&mut self, error: &AuthError) {
        let step = self.current_step();
        self.pending = None;
        self.fail(step, error.to_string());
    }

    fn send(&mut self, step: FlowStep, request: OutgoingRequest) -> FlowAction {
        self.pending = Some((step, request.clone()));
        FlowAction::Send(request)
    }

    fn fail(&mut self, step: FlowStep, detail: String) {
        warn!(step = %step, detail = %detail, "oauth flow failed");
        self.state = FlowState::Failed;
        self.error = Some(AuthError::OAuthFlowFailed { step, detail });
        self.pending = None;
        self.metadata = None;
        self.pkce_challenge = None;
        self.pkce_verifier = None;
        self.authorization = None;
        self.code = None;
        self.token = None;
        if self.registered {
            self.client = None;
            self.registered = false;
        }
    }

    fn on_metadata(&mut self, response: IncomingResponse) {
        if !response.is_success() {
            debug!(status = %response.status, "metadata candidate missed");
            // next_action moves on to the next candidate or fails
            return;
        }
        let metadata = match response.json::<AuthorizationServerMetadata>() {
            Ok(metadata) => metadata,
            Err(e) => {
                self.fail(FlowStep::AsMetadata, format!("malformed metadata: {e}"));
                return;
            }
        };
        if let Err(e) = metadata.validate(self.grant == Grant::AuthorizationCode) {
            self.fail(FlowStep::AsMetadata, e.to_string());
            return;
        }
        debug!(issuer = %metadata.issuer, "authorization server metadata fetched");
        self.metadata = Some(metadata);
        self.state = FlowState::AsMetadataFetched;
    }

    fn on_registration(&mut self, response: IncomingResponse) {
        if !response.is_success() {
            self.fail(FlowStep::Registration, describe_failure(&response));
            return;
        }
        match response.json::<RegistrationResponse>() {
            Ok(registration) => {
                info!(client_id = %registration.client_id, "registered oauth client");
                self.client = Some(registration.into());
                self.registered = true;
                self.state = FlowState::Registered;
            }
            Err(e) => self.fail(FlowStep::Registration, format!("malformed registration: {e}")),
        }
    }

    fn on_token(&mut self, response: IncomingResponse) {
        if !response.is_success() {
            self.fail(FlowStep::TokenExchange, describe_failure(&response));
            return;
        }
        let body = match response.json::<TokenResponse>() {
            Ok(body) => body,
            Err(e) => {
                self.fail(FlowStep::TokenExchange, format!("malformed token response: {e}"));
                return;
            }
        };
        let previous_refresh = match &self.grant {
            Grant::Refresh(refresh_token) => Some(refresh_token.clone()),
            _ => None,
        };
        let token = body.into_token(Utc::now(), previous_refresh);
        if self.dpop.is_some() && !token.is_dpop() {
            debug!(token_type = %token.token_type, "DPoP proof sent but token is not DPoP-bound");
        }
        self.token = Some(token);
        self.code = None;
        self.pkce_verifier = None;
        self.state = FlowState::TokenExchanged;
    }

    fn metadata_or_err(&self) -> std::result::Result<&AuthorizationServerMetadata, String> {
        self.metadata
            .as_ref()
            .ok_or_else(|| "authorization server metadata unavailable".to_string())
    }

    fn registration_request(&self) -> std::result::Result<OutgoingRequest, String> {
        let metadata = self.metadata_or_err()?;
        let url = metadata
            .registration_url()
            .map_err(|e| e.to_string())?
            .ok_or_else(|| {
                "no client_id configured and the authorization server does not support dynamic registration"
                    .to_string()
            })?;
        debug!(url = %url, "registering oauth client");
        OutgoingRequest::post_json(url, &RegistrationRequest::for_client(&self.config))
            .map_err(|e| e.to_string())
    }

    fn authorization_request(&self) -> std::result::Result<AuthorizationRequest, String> {
        let metadata = self.metadata_or_err()?;
        let client = self.client.as_ref().ok_or("no client id")?;
        let challenge = self.pkce_challenge.as_ref().ok_or("PKCE challenge missing")?;
        let mut url = metadata.authorization_url().map_err(|e| e.to_string())?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &client.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("state", &self.csrf_state)
                .append_pair("code_challenge", challenge.as_str())
                .append_pair("code_challenge_method", challenge.method().as_str())
                .append_pair("resource", self.resource.as_str());
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
        }
        Ok(AuthorizationRequest {
            url,
            state: self.csrf_state.clone(),
        })
    }

    fn token_request(&self) -> std::result::Result<OutgoingRequest, String> {
        let metadata = self.metadata_or_err()?;
        let url = metadata.token_url().map_err(|e| e.to_string())?;

        let mut fields: Vec<(&str, String)> = Vec::new();
        match &self.grant {
            Grant::AuthorizationCode => {
                let code = self.code.as_ref().ok_or("authorization code missing")?;
                let verifier = self.pkce_verifier.as_ref().ok_or("PKCE verifier missing")?;
                fields.push(("grant_type", "authorization_code".into()));
                fields.push(("code", code.clone()));
                fields.push(("redirect_uri", self.config.redirect_uri.clone()));
                fields.push(("code_verifier", verifier.secret().clone()));
            }
            Grant::ClientCredentials => {
                fields.push(("grant_type", "client_credentials".into()));
                if !self.config.scopes.is_empty() {
                    fields.push(("scope", self.config.scopes.join(" ")));
                }
            }
            Grant::Refresh(refresh_token) => {
                fields.push(("grant_type", "refresh_token".into()));
                fields.push(("refresh_token", refresh_token.clone()));
            }
        }
        fields.push(("resource", self.resource.to_string()));

        let mut basic = None;
        if let Some(client) = &self.client {
            match client.secret() {
                Some(secret) if self.use_post_auth(metadata, client) => {
                    fields.push(("client_id", client.client_id.clone()));
                    fields.push(("client_secret", secret.to_string()));
                }
                Some(secret) => basic = Some(basic_auth(&client.client_id, secret)),
                None => fields.push(("client_id", client.client_id.clone())),
            }
        }

        let mut request =
            OutgoingRequest::post_form(url.clone(), fields.iter().map(|(k, v)| (*k, v.as_str())));
        if let Some(value) = basic {
            let value = HeaderValue::from_str(&value).map_err(|e| e.to_string())?;
            request.headers.insert(AUTHORIZATION, value);
        }
        if let Some(generator) = &self.dpop {
            let proof = generator
                .generate_proof("POST", url.as_str(), None)
                .map_err(|e| format!("DPoP proof generation failed: {e}"))?;
            request
                .set_header(DPOP_HEADER, proof.as_str())
                .map_err(|e| e.to_string())?;
        }
        Ok(request)
    }

    fn use_post_auth(&self, metadata: &AuthorizationServerMetadata, client: &ClientInfo) -> bool {
        match client.token_endpoint_auth_method.as_deref() {
            Some(method) => method == "client_secret_post",
            None => {
                metadata.supports_auth_method("client_secret_post")
                    && !metadata.supports_auth_method("client_secret_basic")
            }
        }
    }
}

fn basic_auth(client_id: &str, secret: &str) -> String {
    let encode = |s: &str| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
    let credentials = format!("{}:{}", encode(client_id), encode(secret));
    format!("Basic {}", STANDARD.encode(credentials))
}

impl fmt::Debug for OAuthFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthFlow")
            .field("state", &self.state)
            .field("grant", &match self.grant {
                Grant::AuthorizationCode => "authorization_code",
                Grant::ClientCredentials => "client_credentials",
                Grant::Refresh(_) => "refresh_token",
            })
            .field("resource", &self.resource.as_str())
            .field("client", &self.client)
            .field("dpop", &self.dpop.is_some())
            .finish_non_exhaustive()
    }
}

/// What a completed flow produced
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    /// The token
    pub token: OAuthToken,
    /// Client registered along the way, to persist
    pub registered_client: Option<ClientInfo>,
}

/// Drive `flow` to completion over `transport`
///
/// Each HTTP step is bounded by `step_timeout`. The authorization step waits as long
/// as `authorizer` does; without an authorizer the code grant fails at that step.
///
/// # Errors
/// Returns [`AuthError::OAuthFlowFailed`] naming the step that failed
pub async fn run_flow(
    mut flow: OAuthFlow,
    transport: &dyn HttpTransport,
    authorizer: Option<&dyn AuthorizationHandler>,
    step_timeout: Duration,
) -> Result<FlowOutcome> {
    loop {
        match flow.next_action() {
            FlowAction::Send(request) => {
                match send_with_timeout(transport, request, step_timeout).await {
                    Ok(response) => flow.advance(response),
                    Err(e) => flow.send_failed(&e),
                }
            }
            FlowAction::Authorize(request) => match authorizer {
                Some(authorizer) => match authorizer.authorize(&request).await {
                    Ok(callback) => flow.deliver_callback(callback),
                    Err(e) => flow.deny(e),
                },
                None => flow.deny("no authorization handler configured"),
            },
            FlowAction::Done(token) => {
                info!(token_type = %token.token_type, "oauth flow complete");
                return Ok(FlowOutcome {
                    token,
                    registered_client: flow.registered_client().cloned(),
                });
            }
            FlowAction::Failed(error) => return Err(error),
        }
    }
}
