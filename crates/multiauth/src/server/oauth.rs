//! OAuth access token verification, bearer and DPoP-bound

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use multiauth_dpop::{DPOP_HEADER, DpopError, DpopVerifier, ProofContext};

use super::introspection::TokenIntrospector;
use super::{AccessToken, InboundRequest, TokenVerifier};
use crate::challenge::WwwAuthenticateBuilder;
use crate::types::OAUTH2_PROTOCOL;
use crate::{AuthError, Result};

/// Verifies `Authorization: Bearer` and `Authorization: DPoP` access tokens
///
/// Order of checks for a DPoP request: proof present, token active and unexpired,
/// proof valid for this request and token (signature, key binding, `htm`/`htu`, `iat`,
/// `ath`, replay), required scopes.
#[derive(Debug, Clone)]
pub struct OAuthTokenVerifier {
    introspector: Arc<dyn TokenIntrospector>,
    dpop: Option<DpopVerifier>,
    require_dpop: bool,
    required_scopes: Vec<String>,
}

impl OAuthTokenVerifier {
    /// Verifier backed by `introspector`; bearer tokens only until DPoP is enabled
    pub fn new(introspector: Arc<dyn TokenIntrospector>) -> Self {
        Self {
            introspector,
            dpop: None,
            require_dpop: false,
            required_scopes: Vec::new(),
        }
    }

    /// Accept DPoP-bound tokens, checking proofs with `verifier`
    #[must_use]
    pub fn with_dpop(mut self, verifier: DpopVerifier) -> Self {
        self.dpop = Some(verifier);
        self
    }

    /// Reject tokens presented without a proof
    #[must_use]
    pub fn require_dpop(mut self) -> Self {
        self.require_dpop = true;
        if self.dpop.is_none() {
            self.dpop = Some(DpopVerifier::new());
        }
        self
    }

    /// Scopes every token must carry
    #[must_use]
    pub fn with_required_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl TokenVerifier for OAuthTokenVerifier {
    fn protocol_id(&self) -> &str {
        OAUTH2_PROTOCOL
    }

    async fn verify(&self, request: &InboundRequest) -> Result<Option<AccessToken>> {
        let Some((scheme, token)) = request.authorization() else {
            return Ok(None);
        };
        let dpop_scheme = scheme.eq_ignore_ascii_case("dpop");
        if !dpop_scheme && !scheme.eq_ignore_ascii_case("bearer") {
            return Ok(None);
        }

        let proof = request.header(DPOP_HEADER);
        let dpop = match (&self.dpop, dpop_scheme) {
            (None, true) => return Err(AuthError::invalid_token("DPoP tokens are not accepted")),
            (Some(_), false) if self.require_dpop => {
                return Err(AuthError::DpopValidation(DpopError::MissingProof));
            }
            (Some(verifier), true) => match proof {
                Some(proof) => Some((verifier, proof)),
                None => return Err(AuthError::DpopValidation(DpopError::MissingProof)),
            },
            _ => None,
        };

        let introspection = self.introspector.introspect(token).await?;
        if !introspection.active {
            return Err(AuthError::invalid_token("token is not active"));
        }
        let expires_at = introspection.expires_at();
        if expires_at.is_some_and(|exp| exp <= Utc::now()) {
            return Err(AuthError::Expired);
        }

        let bound = introspection.bound_thumbprint();
        let thumbprint = match dpop {
            Some((verifier, proof)) => {
                if bound.is_none() && self.require_dpop {
                    return Err(AuthError::invalid_token("token is not key-bound"));
                }
                let mut context = ProofContext::new(request.method.as_str(), &request.uri)
                    .with_access_token(token);
                if let Some(jkt) = bound {
                    context = context.with_bound_thumbprint(jkt);
                }
                Some(verifier.verify(proof, &context).await?.thumbprint)
            }
            None if bound.is_some() => {
                return Err(AuthError::invalid_token("key-bound token presented as bearer"));
            }
            None => None,
        };

        let scopes = introspection.scopes();
        if let Some(missing) = self
            .required_scopes
            .iter()
            .find(|required| !scopes.contains(required))
        {
            return Err(AuthError::invalid_token(format!("missing scope {missing}")));
        }

        let subject = introspection
            .sub
            .or(introspection.username)
            .or_else(|| introspection.client_id.clone())
            .ok_or_else(|| AuthError::invalid_token("token has no subject"))?;
        Ok(Some(AccessToken {
            subject,
            protocol_id: OAUTH2_PROTOCOL.to_string(),
            scopes,
            client_id: introspection.client_id,
            expires_at,
            dpop_thumbprint: thumbprint,
        }))
    }

    fn challenge(&self, builder: WwwAuthenticateBuilder) -> WwwAuthenticateBuilder {
        match &self.dpop {
            Some(verifier) => builder.with_dpop_algs(
                verifier
                    .config()
                    .allowed_algorithms
                    .iter()
                    .map(|alg| alg.as_str()),
            ),
            None => builder,
        }
    }
}
