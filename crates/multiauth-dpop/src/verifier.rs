//! Server-side DPoP proof verification (RFC 9449 Section 4.3)
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. signature against the embedded JWK, then the key thumbprint against the token binding
//! 2. `htm` / `htu` against the actual request
//! 3. `iat` within the clock-skew window
//! 4. `ath` against the presented access token
//! 5. `(thumbprint, jti)` not seen within the replay window, then recorded
//!
//! The replay record is written last so a proof that fails any earlier check does not
//! consume its `jti`.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use jsonwebtoken::{Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::helpers::{
    clean_http_uri, compute_access_token_hash, compute_jwk_thumbprint, constant_time_compare,
    jwk_to_decoding_key, unix_seconds,
};
use crate::replay::{MemoryReplayCache, ReplayCache};
use crate::{
    DEFAULT_REPLAY_WINDOW_SECONDS, DPOP_JWT_TYPE, DpopAlgorithm, DpopClaims, DpopError,
    MAX_CLOCK_SKEW_SECONDS, Result,
};

/// Verifier tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpopVerifierConfig {
    /// Maximum distance between `iat` and the server clock, in either direction
    pub max_clock_skew: Duration,
    /// How long a `(key, jti)` pair is remembered
    pub replay_window: Duration,
    /// Algorithms accepted in proof headers
    pub allowed_algorithms: Vec<DpopAlgorithm>,
}

impl Default for DpopVerifierConfig {
    fn default() -> Self {
        Self {
            max_clock_skew: Duration::from_secs(MAX_CLOCK_SKEW_SECONDS as u64),
            replay_window: Duration::from_secs(DEFAULT_REPLAY_WINDOW_SECONDS),
            allowed_algorithms: vec![DpopAlgorithm::ES256],
        }
    }
}

impl DpopVerifierConfig {
    /// Reject configurations that cannot verify anything
    ///
    /// # Errors
    /// Returns [`DpopError::ConfigurationError`] if no algorithm is allowed, or the replay
    /// window is zero or shorter than the `iat` acceptance span (twice the clock skew).
    pub fn validate(&self) -> Result<()> {
        if self.allowed_algorithms.is_empty() {
            return Err(DpopError::ConfigurationError {
                reason: "at least one DPoP algorithm must be allowed".to_string(),
            });
        }
        if self.replay_window.is_zero() {
            return Err(DpopError::ConfigurationError {
                reason: "replay window must be non-zero".to_string(),
            });
        }
        // a jti must stay cached for as long as its iat can still be accepted
        let acceptance_span = self.max_clock_skew.saturating_mul(2);
        if self.replay_window < acceptance_span {
            return Err(DpopError::ConfigurationError {
                reason: format!(
                    "replay window of {}s is shorter than the {}s an iat stays acceptable",
                    self.replay_window.as_secs(),
                    acceptance_span.as_secs()
                ),
            });
        }
        Ok(())
    }
}

/// The request a proof is checked against
#[derive(Debug, Clone, Copy)]
pub struct ProofContext<'a> {
    /// Actual HTTP method
    pub method: &'a str,
    /// Actual request URI (query and fragment are ignored)
    pub uri: &'a str,
    /// Access token presented alongside the proof; when set `ath` is required
    pub access_token: Option<&'a str>,
    /// Thumbprint the token is bound to (`cnf.jkt`), when the token declares one
    pub bound_thumbprint: Option<&'a str>,
}

impl<'a> ProofContext<'a> {
    /// Context for a request without an access token (e.g. a token endpoint call)
    pub fn new(method: &'a str, uri: &'a str) -> Self {
        Self {
            method,
            uri,
            access_token: None,
            bound_thumbprint: None,
        }
    }

    /// Require `ath` to hash this token
    pub fn with_access_token(mut self, token: &'a str) -> Self {
        self.access_token = Some(token);
        self
    }

    /// Require the proof key to have this thumbprint
    pub fn with_bound_thumbprint(mut self, jkt: &'a str) -> Self {
        self.bound_thumbprint = Some(jkt);
        self
    }
}

/// A proof that passed every check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedProof {
    /// Verified claims
    pub claims: DpopClaims,
    /// Thumbprint of the key that signed the proof
    pub thumbprint: String,
}

/// Verifies inbound DPoP proofs and tracks replays
#[derive(Debug, Clone)]
pub struct DpopVerifier {
    config: DpopVerifierConfig,
    replay_cache: Arc<dyn ReplayCache>,
}

impl Default for DpopVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DpopVerifier {
    /// Verifier with default tuning and an in-memory replay cache
    pub fn new() -> Self {
        Self {
            config: DpopVerifierConfig::default(),
            replay_cache: Arc::new(MemoryReplayCache::new()),
        }
    }

    /// Verifier with custom tuning and an in-memory replay cache
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn with_config(config: DpopVerifierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            replay_cache: Arc::new(MemoryReplayCache::new()),
        })
    }

    /// Replace the replay cache, e.g. with one shared across server instances
    pub fn with_replay_cache(mut self, cache: Arc<dyn ReplayCache>) -> Self {
        self.replay_cache = cache;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &DpopVerifierConfig {
        &self.config
    }

    /// Verify `proof_jwt` against the request described by `context`
    ///
    /// # Errors
    /// Returns the first failed check as a [`DpopError`]
    pub async fn verify(&self, proof_jwt: &str, context: &ProofContext<'_>) -> Result<VerifiedProof> {
        let now = SystemTime::now();

        let (claims, thumbprint) = self.verify_signature(proof_jwt)?;
        if let Some(bound) = context.bound_thumbprint
            && !constant_time_compare(bound, &thumbprint)
        {
            return Err(DpopError::ThumbprintMismatch);
        }

        Self::verify_http_binding(&claims, context)?;
        self.verify_timestamp(&claims, now)?;
        Self::verify_access_token_hash(&claims, context)?;

        // TODO: validate `nonce` once server-issued DPoP nonces (RFC 9449 Section 8) exist
        let replay_key = format!("{}:{}", thumbprint, claims.jti);
        if !self
            .replay_cache
            .check_and_record(&replay_key, now, self.config.replay_window)
            .await?
        {
            return Err(DpopError::ReplayAttackDetected {
                jti: claims.jti.clone(),
            });
        }

        debug!(jti = %claims.jti, htm = %claims.htm, "DPoP proof verified");
        Ok(VerifiedProof { claims, thumbprint })
    }

    fn verify_signature(&self, proof_jwt: &str) -> Result<(DpopClaims, String)> {
        let header = decode_header(proof_jwt).map_err(|e| DpopError::InvalidProofStructure {
            reason: format!("Failed to decode JWT header: {}", e),
        })?;

        if header.typ.as_deref() != Some(DPOP_JWT_TYPE) {
            return Err(DpopError::InvalidProofStructure {
                reason: format!(
                    "Invalid JWT type: expected '{}', got '{:?}'",
                    DPOP_JWT_TYPE, header.typ
                ),
            });
        }

        let algorithm = DpopAlgorithm::from_jwt(header.alg)?;
        if !self.config.allowed_algorithms.contains(&algorithm) {
            return Err(DpopError::InvalidProofStructure {
                reason: format!("Algorithm {} not allowed", algorithm),
            });
        }

        let jwk = header.jwk.ok_or_else(|| DpopError::InvalidProofStructure {
            reason: "Missing JWK in DPoP proof header".to_string(),
        })?;
        let decoding_key = jwk_to_decoding_key(&jwk)?;

        // DPoP proofs carry no exp/aud; freshness is checked against iat below
        let mut validation = Validation::new(header.alg);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;

        let token = decode::<DpopClaims>(proof_jwt, &decoding_key, &validation).map_err(|e| {
            DpopError::ProofValidationFailed {
                reason: e.to_string(),
            }
        })?;

        if token.claims.jti.is_empty() {
            return Err(DpopError::InvalidProofStructure {
                reason: "jti must not be empty".to_string(),
            });
        }

        Ok((token.claims, compute_jwk_thumbprint(&jwk)?))
    }

    fn verify_http_binding(claims: &DpopClaims, context: &ProofContext<'_>) -> Result<()> {
        if claims.htm != context.method {
            return Err(DpopError::HttpBindingFailed {
                reason: format!("htm {} does not match {}", claims.htm, context.method),
            });
        }

        let expected = clean_http_uri(context.uri)?;
        // htu may have been produced by a client that did not normalize
        let presented = clean_http_uri(&claims.htu).map_err(|_| DpopError::HttpBindingFailed {
            reason: "htu is not an absolute URI".to_string(),
        })?;
        if presented != expected {
            return Err(DpopError::HttpBindingFailed {
                reason: format!("htu {} does not match {}", presented, expected),
            });
        }
        Ok(())
    }

    fn verify_timestamp(&self, claims: &DpopClaims, now: SystemTime) -> Result<()> {
        let max_skew = i64::try_from(self.config.max_clock_skew.as_secs()).unwrap_or(i64::MAX);
        match unix_seconds(now)
            .checked_sub(claims.iat)
            .and_then(i64::checked_abs)
        {
            Some(skew) if skew <= max_skew => Ok(()),
            skew => Err(DpopError::ClockSkewTooLarge {
                skew_seconds: skew.unwrap_or(i64::MAX),
                max_skew_seconds: max_skew,
            }),
        }
    }

    fn verify_access_token_hash(claims: &DpopClaims, context: &ProofContext<'_>) -> Result<()> {
        let Some(token) = context.access_token else {
            return Ok(());
        };
        let Some(ath) = claims.ath.as_deref() else {
            return Err(DpopError::AccessTokenHashFailed {
                reason: "ath claim missing".to_string(),
            });
        };
        if !constant_time_compare(ath, &compute_access_token_hash(token)) {
            return Err(DpopError::AccessTokenHashFailed {
                reason: "ath does not match access token".to_string(),
            });
        }
        Ok(())
    }
}
