//! Client-side DPoP proof generation (RFC 9449 Section 4)

use std::sync::Arc;
use std::time::SystemTime;

use jsonwebtoken::{Header, encode};
use tracing::trace;

use crate::helpers::{clean_http_uri, compute_access_token_hash, unix_seconds};
use crate::{DPOP_JWT_TYPE, DpopClaims, DpopError, DpopKeyPair, DpopProof, Result};

/// Generates one fresh proof per request from a held key pair
#[derive(Debug, Clone)]
pub struct DpopProofGenerator {
    key_pair: Arc<DpopKeyPair>,
}

impl DpopProofGenerator {
    /// Create a generator around an existing key pair
    pub fn new(key_pair: DpopKeyPair) -> Self {
        Self {
            key_pair: Arc::new(key_pair),
        }
    }

    /// Create a generator with a newly generated P-256 key
    ///
    /// # Errors
    /// Returns error if key generation fails
    pub fn generate() -> Result<Self> {
        DpopKeyPair::generate_p256().map(Self::new)
    }

    /// Key pair used for signing
    pub fn key_pair(&self) -> &DpopKeyPair {
        &self.key_pair
    }

    /// Thumbprint a token issued to this client should be bound to
    pub fn thumbprint(&self) -> &str {
        self.key_pair.thumbprint()
    }

    /// Generate a proof for `method` and `uri`
    ///
    /// When `access_token` is given the proof carries its hash in `ath`; omit it for
    /// token endpoint requests where no token exists yet.
    ///
    /// # Errors
    /// Returns error if the URI is not absolute or signing fails
    pub fn generate_proof(
        &self,
        method: &str,
        uri: &str,
        access_token: Option<&str>,
    ) -> Result<DpopProof> {
        let claims = DpopClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            htm: method.to_ascii_uppercase(),
            htu: clean_http_uri(uri)?,
            iat: unix_seconds(SystemTime::now()),
            ath: access_token.map(compute_access_token_hash),
            nonce: None,
        };

        let mut header = Header::new(self.key_pair.algorithm().to_jwt());
        header.typ = Some(DPOP_JWT_TYPE.to_string());
        header.jwk = Some(self.key_pair.public_jwk().clone());

        let jwt = encode(&header, &claims, self.key_pair.encoding_key()).map_err(|e| {
            DpopError::CryptographicError {
                reason: format!("Failed to sign DPoP proof: {}", e),
            }
        })?;

        trace!(htm = %claims.htm, htu = %claims.htu, jti = %claims.jti, "generated DPoP proof");
        Ok(DpopProof::new(
            jwt,
            claims,
            self.key_pair.thumbprint().to_string(),
        ))
    }
}
