//! API key verification
//!
//! Keys are stored as BLAKE3 digests and compared with `subtle`, so lookup time does
//! not depend on how much of a guess matches. Every configured key is compared on
//! every request.

use std::fmt;

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use tracing::trace;

use super::{AccessToken, InboundRequest, TokenVerifier};
use crate::types::{API_KEY_HEADER, API_KEY_PROTOCOL};
use crate::{AuthError, Result};

#[inline]
fn hash_api_key(key: &str) -> [u8; 32] {
    blake3::hash(key.as_bytes()).into()
}

/// Accepts configured API keys from `X-API-Key`, or `Authorization: Bearer`
#[derive(Clone, Default)]
pub struct ApiKeyVerifier {
    keys: Vec<([u8; 32], String)>,
}

impl ApiKeyVerifier {
    /// Verifier with no keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `key`, authenticating as `subject`
    #[must_use]
    pub fn with_key(mut self, key: &str, subject: impl Into<String>) -> Self {
        self.keys.push((hash_api_key(key), subject.into()));
        self
    }

    /// Accept each key, with the key's position as subject (`api_key:0`, ...)
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        keys.into_iter()
            .enumerate()
            .fold(Self::new(), |verifier, (i, key)| {
                verifier.with_key(key, format!("{API_KEY_PROTOCOL}:{i}"))
            })
    }

    /// Number of configured keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are configured
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn lookup(&self, presented: &str) -> Option<&str> {
        let digest = hash_api_key(presented);
        let mut subject = None;
        for (stored, name) in &self.keys {
            let equal: bool = stored.ct_eq(&digest).into();
            if equal && subject.is_none() {
                subject = Some(name.as_str());
            }
        }
        subject
    }
}

impl fmt::Debug for ApiKeyVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyVerifier")
            .field("keys", &self.keys.len())
            .finish()
    }
}

#[async_trait]
impl TokenVerifier for ApiKeyVerifier {
    fn protocol_id(&self) -> &str {
        API_KEY_PROTOCOL
    }

    async fn verify(&self, request: &InboundRequest) -> Result<Option<AccessToken>> {
        if let Some(key) = request.header(API_KEY_HEADER) {
            return match self.lookup(key) {
                Some(subject) => Ok(Some(AccessToken::new(subject, API_KEY_PROTOCOL))),
                None => Err(AuthError::invalid_token("unknown API key")),
            };
        }

        // the bearer value may well be an OAuth token meant for another verifier
        if let Some((scheme, value)) = request.authorization()
            && scheme.eq_ignore_ascii_case("bearer")
            && let Some(subject) = self.lookup(value)
        {
            trace!("API key accepted from Authorization header");
            return Ok(Some(AccessToken::new(subject, API_KEY_PROTOCOL)));
        }
        Ok(None)
    }
}
