//! Ordered verifier chain

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue, WWW_AUTHENTICATE};
use http::{HeaderMap, StatusCode};
use tracing::debug;

use super::{AccessToken, InboundRequest, TokenVerifier};
use crate::challenge::WwwAuthenticateBuilder;
use crate::{AuthError, Result};

/// Verifiers tried in order; the first to produce an [`AccessToken`] wins
///
/// A verifier that rejects credentials does not stop the chain, and the caller learns
/// only that nothing accepted the request. Rejection reasons go to `debug` logs.
#[derive(Debug, Clone, Default)]
pub struct VerifierChain {
    verifiers: Vec<Arc<dyn TokenVerifier>>,
}

impl VerifierChain {
    /// Empty chain; rejects everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a verifier
    #[must_use]
    pub fn with(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifiers.push(verifier);
        self
    }

    /// Append a verifier in place
    pub fn push(&mut self, verifier: Arc<dyn TokenVerifier>) {
        self.verifiers.push(verifier);
    }

    /// Number of verifiers
    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    /// Whether the chain has no verifiers
    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }

    /// Protocol ids in chain order
    pub fn protocol_ids(&self) -> Vec<&str> {
        self.verifiers.iter().map(|v| v.protocol_id()).collect()
    }

    /// Authenticate a request
    ///
    /// # Errors
    /// Returns [`AuthError::VerifierChainExhausted`] when no verifier accepts it
    pub async fn verify(&self, request: &InboundRequest) -> Result<AccessToken> {
        for verifier in &self.verifiers {
            match verifier.verify(request).await {
                Ok(Some(token)) => {
                    debug!(
                        protocol = verifier.protocol_id(),
                        subject = %token.subject,
                        "request authenticated"
                    );
                    return Ok(token);
                }
                Ok(None) => {}
                Err(e) => debug!(
                    protocol = verifier.protocol_id(),
                    reason = reason_code(&e),
                    error = %e,
                    "verifier rejected credentials"
                ),
            }
        }
        Err(AuthError::VerifierChainExhausted)
    }

    /// The 401 for a rejected request
    ///
    /// `challenge` carries the server's discovery hints; each verifier may add its own
    /// parameters (DPoP algorithms, for instance).
    pub fn unauthorized(&self, challenge: &WwwAuthenticateBuilder) -> UnauthorizedResponse {
        let challenge = self
            .verifiers
            .iter()
            .fold(challenge.clone(), |builder, verifier| verifier.challenge(builder));
        UnauthorizedResponse::new(&challenge.build())
    }
}

fn reason_code(error: &AuthError) -> &'static str {
    match error {
        AuthError::DpopValidation(e) => e.reason_code(),
        AuthError::InvalidToken { .. } => "invalid_token",
        AuthError::Expired => "expired",
        AuthError::Transport { .. } | AuthError::Timeout { .. } => "transport",
        _ => "other",
    }
}

/// Status, headers and body of a 401
#[derive(Debug, Clone, PartialEq)]
pub struct UnauthorizedResponse {
    /// Always 401
    pub status: StatusCode,
    /// `WWW-Authenticate` and `Content-Type`
    pub headers: HeaderMap,
    /// Generic JSON error body
    pub body: Bytes,
}

impl UnauthorizedResponse {
    fn new(challenge: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match HeaderValue::from_str(challenge) {
            Ok(value) => {
                headers.insert(WWW_AUTHENTICATE, value);
            }
            Err(_) => {
                headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
        }
        Self {
            status: StatusCode::UNAUTHORIZED,
            headers,
            body: Bytes::from_static(br#"{"error":"unauthorized"}"#),
        }
    }

    /// The `WWW-Authenticate` value
    pub fn challenge(&self) -> Option<&str> {
        self.headers
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
    }

    /// As an `http::Response`
    pub fn into_response<B: From<Bytes>>(self) -> http::Response<B> {
        let mut response = http::Response::new(B::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
