//! Core DPoP types: algorithms, key pairs, proof claims and signed proofs

use std::fmt;
use std::time::SystemTime;

use jsonwebtoken::EncodingKey;
use jsonwebtoken::jwk::Jwk;
use p256::SecretKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use serde::{Deserialize, Serialize};

use crate::helpers::{compute_jwk_thumbprint, p256_public_jwk};
use crate::{DpopError, Result};

/// Signature algorithms accepted for DPoP proofs
///
/// Only ES256 is supported. RSA variants are intentionally absent (RUSTSEC-2023-0071).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DpopAlgorithm {
    /// ECDSA using P-256 and SHA-256
    ES256,
}

impl DpopAlgorithm {
    /// JOSE algorithm name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ES256 => "ES256",
        }
    }

    /// jsonwebtoken algorithm
    pub fn to_jwt(self) -> jsonwebtoken::Algorithm {
        match self {
            Self::ES256 => jsonwebtoken::Algorithm::ES256,
        }
    }

    /// Map a jsonwebtoken algorithm back, rejecting anything unsupported
    ///
    /// # Errors
    /// Returns [`DpopError::InvalidProofStructure`] for algorithms other than ES256.
    pub fn from_jwt(algorithm: jsonwebtoken::Algorithm) -> Result<Self> {
        match algorithm {
            jsonwebtoken::Algorithm::ES256 => Ok(Self::ES256),
            other => Err(DpopError::InvalidProofStructure {
                reason: format!("Unsupported DPoP algorithm: {:?}", other),
            }),
        }
    }
}

impl fmt::Display for DpopAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client-held DPoP key pair
///
/// The private half is kept only as a signing key; it never leaves this struct.
#[derive(Clone)]
pub struct DpopKeyPair {
    id: String,
    encoding_key: EncodingKey,
    public_jwk: Jwk,
    thumbprint: String,
    algorithm: DpopAlgorithm,
    created_at: SystemTime,
}

impl DpopKeyPair {
    /// Generate a fresh P-256 key pair
    ///
    /// # Errors
    /// Returns error if the key cannot be encoded for signing
    pub fn generate_p256() -> Result<Self> {
        let secret_key = SecretKey::random(&mut rand::rngs::OsRng);
        Self::from_secret_key(&secret_key)
    }

    /// Load a P-256 key pair from a PKCS#8 PEM document
    ///
    /// # Errors
    /// Returns error if the PEM is not a P-256 PKCS#8 private key
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let secret_key =
            SecretKey::from_pkcs8_pem(pem).map_err(|e| DpopError::CryptographicError {
                reason: format!("Invalid P-256 PKCS#8 key: {}", e),
            })?;
        Self::from_secret_key(&secret_key)
    }

    fn from_secret_key(secret_key: &SecretKey) -> Result<Self> {
        let point = secret_key.public_key().to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(DpopError::CryptographicError {
                reason: "P-256 public key has no affine coordinates".to_string(),
            });
        };
        let public_jwk = p256_public_jwk(x, y)?;
        let thumbprint = compute_jwk_thumbprint(&public_jwk)?;

        // jsonwebtoken signs EC keys from PKCS#8 DER
        let pkcs8_der = secret_key
            .to_pkcs8_der()
            .map_err(|e| DpopError::CryptographicError {
                reason: format!("Failed to convert EC key to PKCS#8: {}", e),
            })?;

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            encoding_key: EncodingKey::from_ec_der(pkcs8_der.as_bytes()),
            public_jwk,
            thumbprint,
            algorithm: DpopAlgorithm::ES256,
            created_at: SystemTime::now(),
        })
    }

    /// Local identifier of this key pair
    pub fn id(&self) -> &str {
        &self.id
    }

    /// RFC 7638 thumbprint of the public key (the `jkt` a token is bound to)
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Public key as embedded in proof headers
    pub fn public_jwk(&self) -> &Jwk {
        &self.public_jwk
    }

    /// Signing algorithm
    pub fn algorithm(&self) -> DpopAlgorithm {
        self.algorithm
    }

    /// When the key pair was created or loaded
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

impl fmt::Debug for DpopKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DpopKeyPair")
            .field("id", &self.id)
            .field("thumbprint", &self.thumbprint)
            .field("algorithm", &self.algorithm)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Claims carried by a DPoP proof (RFC 9449 Section 4.2)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpopClaims {
    /// Unique proof identifier
    pub jti: String,
    /// HTTP method of the request
    pub htm: String,
    /// HTTP URI of the request, without query and fragment
    pub htu: String,
    /// Issued-at, seconds since the Unix epoch
    pub iat: i64,
    /// Base64url SHA-256 of the access token, when bound to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ath: Option<String>,
    /// Server-provided nonce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// A signed, single-use DPoP proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpopProof {
    jwt: String,
    claims: DpopClaims,
    thumbprint: String,
}

impl DpopProof {
    pub(crate) fn new(jwt: String, claims: DpopClaims, thumbprint: String) -> Self {
        Self {
            jwt,
            claims,
            thumbprint,
        }
    }

    /// Compact JWS serialization, the value of the `DPoP` header
    pub fn as_str(&self) -> &str {
        &self.jwt
    }

    /// Signed claims
    pub fn claims(&self) -> &DpopClaims {
        &self.claims
    }

    /// Thumbprint of the signing key
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Consume the proof, returning the header value
    pub fn into_header_value(self) -> String {
        self.jwt
    }
}

impl fmt::Display for DpopProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.jwt)
    }
}
