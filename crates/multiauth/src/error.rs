//! Error types for the authorization layer
//!
//! Callers branch on [`AuthError::kind`] rather than on message text. Messages are
//! written for logs and for the operator; server code never copies them into responses.

use std::time::Duration;

use multiauth_dpop::DpopError;
use thiserror::Error;

use crate::oauth2::FlowStep;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, AuthError>;

/// Coarse classification of [`AuthError`] for control flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    /// The user or operator declined to authenticate
    Denied,
    /// Credentials are past their expiry
    Expired,
    /// Network failure or timeout talking to a remote party
    TransportError,
    /// No discovery location produced a protocol list
    Discovery,
    /// Client and server share no protocol
    NoMutualProtocol,
    /// An OAuth flow step failed
    FlowFailed,
    /// A DPoP proof was rejected
    InvalidProof,
    /// Inbound credentials were not accepted
    Unauthorized,
    /// Invalid setup detected at construction time
    Configuration,
    /// Anything else
    Internal,
}

/// Errors raised by discovery, selection, flows, interception and verification
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Every discovery location failed
    #[error("authorization discovery exhausted; last URL tried: {last_url}")]
    DiscoveryExhausted {
        /// Last well-known URL that was attempted
        last_url: String,
    },

    /// The intersection of advertised and registered protocols is empty
    #[error("no mutually supported authentication protocol (server offered: [{}])", .candidates.join(", "))]
    NoMutualProtocol {
        /// Protocol ids the server offered
        candidates: Vec<String>,
    },

    /// An OAuth flow terminated; no partial progress is kept
    #[error("OAuth flow failed at {step}: {detail}")]
    OAuthFlowFailed {
        /// Step at which the flow failed
        step: FlowStep,
        /// What went wrong
        detail: String,
    },

    /// A DPoP proof failed verification
    #[error("DPoP validation failed: {0}")]
    DpopValidation(#[from] DpopError),

    /// No verifier in the chain accepted the request
    #[error("no verifier accepted the request credentials")]
    VerifierChainExhausted,

    /// Inbound credentials were recognized but rejected
    #[error("invalid credentials: {reason}")]
    InvalidToken {
        /// Why the credential was rejected
        reason: String,
    },

    /// Authentication was declined
    #[error("authentication denied: {reason}")]
    AuthenticationDenied {
        /// Why authentication did not happen
        reason: String,
    },

    /// Credentials expired
    #[error("credentials expired")]
    Expired,

    /// Network failure
    #[error("transport error: {detail}")]
    Transport {
        /// Underlying failure
        detail: String,
    },

    /// A step did not complete in time
    #[error("operation timed out after {after:?}")]
    Timeout {
        /// Configured limit
        after: Duration,
    },

    /// Invalid configuration
    #[error("invalid configuration: {detail}")]
    Configuration {
        /// What is wrong
        detail: String,
    },

    /// Two protocols registered under one id
    #[error("protocol '{protocol_id}' is registered more than once")]
    DuplicateProtocol {
        /// Offending id
        protocol_id: String,
    },

    /// Protocol exists but cannot perform the requested operation
    #[error("protocol '{protocol_id}' is not supported for this operation")]
    UnsupportedProtocol {
        /// Protocol id
        protocol_id: String,
    },

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Classify this error
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::DiscoveryExhausted { .. } => AuthErrorKind::Discovery,
            Self::NoMutualProtocol { .. } => AuthErrorKind::NoMutualProtocol,
            Self::OAuthFlowFailed { .. } => AuthErrorKind::FlowFailed,
            Self::DpopValidation(_) => AuthErrorKind::InvalidProof,
            Self::VerifierChainExhausted | Self::InvalidToken { .. } => AuthErrorKind::Unauthorized,
            Self::AuthenticationDenied { .. } => AuthErrorKind::Denied,
            Self::Expired => AuthErrorKind::Expired,
            Self::Transport { .. } | Self::Timeout { .. } => AuthErrorKind::TransportError,
            Self::Configuration { .. } | Self::DuplicateProtocol { .. } => {
                AuthErrorKind::Configuration
            }
            Self::UnsupportedProtocol { .. } | Self::Serialization(_) => AuthErrorKind::Internal,
        }
    }

    /// Shorthand for a transport failure
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport {
            detail: detail.into(),
        }
    }

    /// Shorthand for a configuration failure
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration {
            detail: detail.into(),
        }
    }

    /// Shorthand for a rejected inbound credential
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidToken {
            reason: reason.into(),
        }
    }

    /// Shorthand for a declined authentication
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::AuthenticationDenied {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
