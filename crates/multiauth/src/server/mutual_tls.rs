//! Mutual TLS verifier placeholder

use async_trait::async_trait;
use tracing::trace;

use super::{AccessToken, InboundRequest, TokenVerifier};
use crate::Result;
use crate::types::MUTUAL_TLS_PROTOCOL;

/// Occupies the `mutual_tls` slot in a chain; never authenticates
///
/// Client certificates are checked by the TLS terminator, which this crate does not
/// own, so there is nothing here to verify.
#[derive(Debug, Clone, Copy, Default)]
pub struct MutualTlsVerifier;

impl MutualTlsVerifier {
    /// New placeholder
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenVerifier for MutualTlsVerifier {
    fn protocol_id(&self) -> &str {
        MUTUAL_TLS_PROTOCOL
    }

    async fn verify(&self, _request: &InboundRequest) -> Result<Option<AccessToken>> {
        trace!("mutual TLS verifier is a placeholder; passing");
        Ok(None)
    }
}
