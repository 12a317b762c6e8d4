//! Mutual TLS placeholder
//!
//! Can be registered and advertised so discovery documents and selection account for
//! it, but never produces or accepts credentials. Certificates belong to the TLS
//! layer, which this crate does not own.

use async_trait::async_trait;

use super::{AuthProtocol, AuthenticationContext};
use crate::credentials::AuthCredentials;
use crate::transport::OutgoingRequest;
use crate::types::MUTUAL_TLS_PROTOCOL;
use crate::{AuthError, Result};

/// Declarable `mutual_tls` protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct MutualTlsProtocol;

impl MutualTlsProtocol {
    /// New placeholder
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuthProtocol for MutualTlsProtocol {
    fn protocol_id(&self) -> &str {
        MUTUAL_TLS_PROTOCOL
    }

    async fn authenticate(&self, _context: &AuthenticationContext<'_>) -> Result<AuthCredentials> {
        Err(AuthError::UnsupportedProtocol {
            protocol_id: MUTUAL_TLS_PROTOCOL.to_string(),
        })
    }

    fn prepare_request(
        &self,
        _request: &mut OutgoingRequest,
        _credentials: &AuthCredentials,
    ) -> Result<()> {
        Ok(())
    }

    fn validate_credentials(&self, _credentials: &AuthCredentials) -> bool {
        false
    }
}
