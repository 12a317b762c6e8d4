//! Token endpoint responses

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::credentials::OAuthToken;
use crate::transport::IncomingResponse;

/// Successful token endpoint response (RFC 6749 section 5.1)
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// `Bearer` or `DPoP`
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Granted scope
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// Convert to a stored token, keeping `previous_refresh` when the server
    /// did not rotate the refresh token
    pub fn into_token(self, now: DateTime<Utc>, previous_refresh: Option<String>) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self
                .expires_in
                .filter(|&secs| secs > 0)
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| now.checked_add_signed(lifetime)),
            scope: self.scope,
        }
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Error body from an OAuth endpoint (RFC 6749 section 5.2)
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    /// Error code
    pub error: String,
    /// Human-readable description
    #[serde(default)]
    pub error_description: Option<String>,
}

/// A short description of a failed OAuth endpoint response
pub(crate) fn describe_failure(response: &IncomingResponse) -> String {
    match response.json::<OAuthErrorResponse>() {
        Ok(body) => match body.error_description {
            Some(description) => {
                format!("HTTP {}: {} ({})", response.status.as_u16(), body.error, description)
            }
            None => format!("HTTP {}: {}", response.status.as_u16(), body.error),
        },
        Err(_) => format!("HTTP {}", response.status.as_u16()),
    }
}
