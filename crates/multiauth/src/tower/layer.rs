//! Tower Layer for request authentication

use std::sync::Arc;

use tower::Layer;

use super::AuthLayerConfig;
use super::service::AuthService;
use crate::challenge::WwwAuthenticateBuilder;
use crate::server::{MetadataRoutes, VerifierChain};

/// Wraps services with [`AuthService`]
#[derive(Debug, Clone)]
pub struct AuthLayer {
    chain: Arc<VerifierChain>,
    challenge: WwwAuthenticateBuilder,
    routes: Option<Arc<MetadataRoutes>>,
    config: AuthLayerConfig,
}

impl AuthLayer {
    /// Layer running `chain`, with a bare `Bearer` challenge
    pub fn new(chain: VerifierChain) -> Self {
        Self::from_arc(Arc::new(chain))
    }

    /// Layer sharing an existing chain
    pub fn from_arc(chain: Arc<VerifierChain>) -> Self {
        Self {
            chain,
            challenge: WwwAuthenticateBuilder::new(),
            routes: None,
            config: AuthLayerConfig::default(),
        }
    }

    /// Serve these well-known documents and advertise them in the 401 challenge
    #[must_use]
    pub fn with_metadata(mut self, routes: MetadataRoutes) -> Self {
        self.challenge = routes.challenge().clone();
        self.routes = Some(Arc::new(routes));
        self
    }

    /// Replace the 401 challenge
    #[must_use]
    pub fn with_challenge(mut self, challenge: WwwAuthenticateBuilder) -> Self {
        self.challenge = challenge;
        self
    }

    /// Replace the configuration
    #[must_use]
    pub fn config(mut self, config: AuthLayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Let unauthenticated requests through
    #[must_use]
    pub fn allow_anonymous(mut self) -> Self {
        self.config.allow_anonymous = true;
        self
    }

    /// Skip authentication for a path
    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.config.bypass_paths.push(path.into());
        self
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService::new(
            inner,
            Arc::clone(&self.chain),
            self.challenge.clone(),
            self.routes.clone(),
            self.config.clone(),
        )
    }
}
