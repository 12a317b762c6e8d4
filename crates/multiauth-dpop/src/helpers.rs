//! Helper functions bridging DPoP types and the jsonwebtoken crate
//!
//! jsonwebtoken does the JWS heavy lifting; these helpers cover JWK construction,
//! RFC 7638 thumbprints, `htu` normalization and `ath` hashing.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, EllipticCurveKeyParameters,
    EllipticCurveKeyType, Jwk, KeyAlgorithm, PublicKeyUse,
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{DpopError, Result};

/// Build the public JWK for a P-256 key from its affine coordinates
///
/// # Errors
/// Returns error if either coordinate is not 32 bytes
pub fn p256_public_jwk(x: &[u8], y: &[u8]) -> Result<Jwk> {
    if x.len() != 32 || y.len() != 32 {
        return Err(DpopError::CryptographicError {
            reason: format!("Invalid EC key coordinates: x={}, y={}", x.len(), y.len()),
        });
    }

    Ok(Jwk {
        common: CommonParameters {
            public_key_use: Some(PublicKeyUse::Signature),
            key_algorithm: Some(KeyAlgorithm::ES256),
            ..CommonParameters::default()
        },
        algorithm: AlgorithmParameters::EllipticCurve(EllipticCurveKeyParameters {
            key_type: EllipticCurveKeyType::EC,
            curve: EllipticCurve::P256,
            x: URL_SAFE_NO_PAD.encode(x),
            y: URL_SAFE_NO_PAD.encode(y),
        }),
    })
}

/// Compute the RFC 7638 thumbprint of a P-256 JWK
///
/// Only the required members are hashed, in lexicographic order.
///
/// # Errors
/// Returns error for non P-256 keys
pub fn compute_jwk_thumbprint(jwk: &Jwk) -> Result<String> {
    let AlgorithmParameters::EllipticCurve(ec) = &jwk.algorithm else {
        return Err(DpopError::InvalidProofStructure {
            reason: "DPoP JWK must be an EC key".to_string(),
        });
    };
    if ec.curve != EllipticCurve::P256 {
        return Err(DpopError::InvalidProofStructure {
            reason: format!("Unsupported elliptic curve: {:?} (only P-256 supported)", ec.curve),
        });
    }

    // Written out by hand so member order and whitespace are exactly canonical
    let canonical = format!(
        r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#,
        ec.x, ec.y
    );
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
}

/// Convert an embedded JWK to a verification key
///
/// # Errors
/// Returns error if the JWK is not a valid P-256 public key
pub fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey> {
    match &jwk.algorithm {
        AlgorithmParameters::EllipticCurve(ec_params) => {
            if ec_params.curve != EllipticCurve::P256 {
                return Err(DpopError::InvalidProofStructure {
                    reason: format!(
                        "Unsupported elliptic curve: {:?} (only P-256 supported)",
                        ec_params.curve
                    ),
                });
            }
            DecodingKey::from_ec_components(&ec_params.x, &ec_params.y).map_err(|e| {
                DpopError::InvalidProofStructure {
                    reason: format!("Failed to create EC decoding key: {}", e),
                }
            })
        }
        other => Err(DpopError::InvalidProofStructure {
            reason: format!("Unsupported JWK algorithm parameters: {:?}", other),
        }),
    }
}

/// Normalize a request URI to its `htu` form: scheme, authority and path only
///
/// # Errors
/// Returns error if the URI cannot be parsed or has no host
pub fn clean_http_uri(uri: &str) -> Result<String> {
    let mut url = url::Url::parse(uri).map_err(|e| DpopError::InvalidProofStructure {
        reason: format!("Invalid URI format: {e}"),
    })?;
    if url.host_str().is_none() {
        return Err(DpopError::InvalidProofStructure {
            reason: "URI missing host".to_string(),
        });
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Base64url SHA-256 of an access token, the `ath` claim
pub fn compute_access_token_hash(access_token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(access_token.as_bytes()))
}

/// Constant-time string comparison for hashes and thumbprints
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Seconds since the Unix epoch
pub(crate) fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_http_uri_strips_query_and_fragment() {
        let cleaned = clean_http_uri("https://API.example.com:443/mcp/tools?x=1#frag").unwrap();
        assert_eq!(cleaned, "https://api.example.com/mcp/tools");
    }

    #[test]
    fn test_clean_http_uri_keeps_non_default_port() {
        let cleaned = clean_http_uri("http://localhost:8080/mcp").unwrap();
        assert_eq!(cleaned, "http://localhost:8080/mcp");
    }

    #[test]
    fn test_clean_http_uri_rejects_relative() {
        assert!(clean_http_uri("/mcp").is_err());
    }

    #[test]
    fn test_access_token_hash_matches_rfc_example() {
        // RFC 9449 Section 4.3 example token and ath
        let ath = compute_access_token_hash("Kz~8mXK1EalYznwH-LC-1fBAo.4Ljp~zsPE_NeO.gxU");
        assert_eq!(ath, "fUHyO2r2Z3DZ53EsNrWBb0xWXoaNy59IiKCAqksmQEo");
    }

    #[test]
    fn test_ec_key_coordinate_validation() {
        assert!(p256_public_jwk(&[0u8; 31], &[0u8; 32]).is_err());
        assert!(p256_public_jwk(&[1u8; 32], &[2u8; 32]).is_ok());
    }

    #[test]
    fn test_thumbprint_is_deterministic() {
        let jwk = p256_public_jwk(&[1u8; 32], &[2u8; 32]).unwrap();
        assert_eq!(
            compute_jwk_thumbprint(&jwk).unwrap(),
            compute_jwk_thumbprint(&jwk.clone()).unwrap()
        );
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
