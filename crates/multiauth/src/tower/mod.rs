//! Tower middleware for resource servers
//!
//! [`AuthLayer`] runs a [`VerifierChain`](crate::server::VerifierChain) in front of an
//! HTTP service:
//!
//! - Authenticated requests reach the inner service with an
//!   [`AccessToken`](crate::server::AccessToken) in their extensions.
//! - Rejected requests get a 401 with the combined `WWW-Authenticate` challenge.
//! - Well-known metadata documents, when configured, are answered directly and
//!   without authentication.
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use multiauth::tower::AuthLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(AuthLayer::new(chain).with_metadata(routes))
//!     .service(my_handler);
//!
//! // in the handler
//! if let Some(token) = req.extensions().get::<AccessToken>() {
//!     tracing::info!(subject = %token.subject, "authenticated");
//! }
//! ```

mod layer;
mod service;

pub use layer::AuthLayer;
pub use service::{AuthService, AuthServiceFuture};

/// Behaviour of the auth layer
#[derive(Debug, Clone, Default)]
pub struct AuthLayerConfig {
    /// Let unauthenticated requests through (without an `AccessToken`)
    pub allow_anonymous: bool,
    /// Request paths that skip authentication
    pub bypass_paths: Vec<String>,
    /// Scheme and authority clients use to reach this server, for DPoP `htu` checks
    pub public_origin: Option<String>,
}

impl AuthLayerConfig {
    /// Config that lets anonymous requests through
    #[must_use]
    pub fn allow_anonymous() -> Self {
        Self {
            allow_anonymous: true,
            ..Default::default()
        }
    }

    /// Add a path that skips authentication
    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.bypass_paths.push(path.into());
        self
    }

    /// Set the public origin
    #[must_use]
    pub fn public_origin(mut self, origin: impl Into<String>) -> Self {
        self.public_origin = Some(origin.into());
        self
    }

    /// Whether `path` skips authentication
    pub fn should_bypass(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| p == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = AuthLayerConfig::default()
            .bypass_path("/health")
            .public_origin("https://api.example.com");
        assert!(!config.allow_anonymous);
        assert!(config.should_bypass("/health"));
        assert!(!config.should_bypass("/mcp"));
        assert!(AuthLayerConfig::allow_anonymous().allow_anonymous);
    }
}
