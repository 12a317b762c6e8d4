//! Error types for DPoP proof generation and verification

use thiserror::Error;

/// Errors raised while generating or verifying DPoP proofs
///
/// The messages are detailed on purpose: they are meant for server-side logs.
/// Resource servers must map every variant to a generic 401 before replying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DpopError {
    /// The proof is not a well-formed DPoP JWT
    #[error("invalid DPoP proof structure: {reason}")]
    InvalidProofStructure {
        /// What was wrong with the proof
        reason: String,
    },

    /// Key generation, encoding or signing failed
    #[error("DPoP cryptographic operation failed: {reason}")]
    CryptographicError {
        /// Underlying failure
        reason: String,
    },

    /// The signature did not verify against the embedded key
    #[error("DPoP signature validation failed: {reason}")]
    ProofValidationFailed {
        /// Underlying failure
        reason: String,
    },

    /// The proof key is not the key the access token is bound to
    #[error("DPoP key thumbprint does not match the token binding")]
    ThumbprintMismatch,

    /// `htm` or `htu` do not match the request
    #[error("DPoP HTTP binding mismatch: {reason}")]
    HttpBindingFailed {
        /// Which claim mismatched
        reason: String,
    },

    /// `iat` is too old or too far in the future
    #[error("DPoP proof outside accepted clock skew ({skew_seconds}s, max {max_skew_seconds}s)")]
    ClockSkewTooLarge {
        /// Observed distance between `iat` and now
        skew_seconds: i64,
        /// Configured tolerance
        max_skew_seconds: i64,
    },

    /// `ath` is missing or does not hash the presented token
    #[error("DPoP access token hash mismatch: {reason}")]
    AccessTokenHashFailed {
        /// What was wrong with `ath`
        reason: String,
    },

    /// The `(key, jti)` pair was already presented within the replay window
    #[error("DPoP proof replay detected for jti {jti}")]
    ReplayAttackDetected {
        /// Replayed proof identifier
        jti: String,
    },

    /// A DPoP-bound request arrived without a proof
    #[error("DPoP proof missing")]
    MissingProof,

    /// Verifier or generator misconfiguration
    #[error("DPoP configuration error: {reason}")]
    ConfigurationError {
        /// What was misconfigured
        reason: String,
    },
}

impl DpopError {
    /// Short, stable identifier for structured log fields
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidProofStructure { .. } => "invalid_structure",
            Self::CryptographicError { .. } => "crypto",
            Self::ProofValidationFailed { .. } => "bad_signature",
            Self::ThumbprintMismatch => "thumbprint_mismatch",
            Self::HttpBindingFailed { .. } => "http_binding",
            Self::ClockSkewTooLarge { .. } => "clock_skew",
            Self::AccessTokenHashFailed { .. } => "ath_mismatch",
            Self::ReplayAttackDetected { .. } => "replay",
            Self::MissingProof => "missing_proof",
            Self::ConfigurationError { .. } => "configuration",
        }
    }
}
