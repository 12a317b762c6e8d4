//! Tower Service for request authentication

use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use tower_service::Service;
use tracing::debug;

use super::AuthLayerConfig;
use crate::challenge::WwwAuthenticateBuilder;
use crate::server::{InboundRequest, MetadataRoute, MetadataRoutes, VerifierChain};

/// Boxed future returned by [`AuthService`]
pub type AuthServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

/// Authenticates requests before forwarding them
#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    chain: Arc<VerifierChain>,
    challenge: WwwAuthenticateBuilder,
    routes: Option<Arc<MetadataRoutes>>,
    config: AuthLayerConfig,
}

impl<S> AuthService<S> {
    /// Service around `inner`
    pub fn new(
        inner: S,
        chain: Arc<VerifierChain>,
        challenge: WwwAuthenticateBuilder,
        routes: Option<Arc<MetadataRoutes>>,
        config: AuthLayerConfig,
    ) -> Self {
        Self {
            inner,
            chain,
            challenge,
            routes,
            config,
        }
    }

    /// Inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Inner service, mutably
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    fn metadata_route(&self, method: &Method, path: &str) -> Option<MetadataRoute> {
        if method != Method::GET {
            return None;
        }
        self.routes.as_ref()?.get(path).cloned()
    }
}

fn metadata_response<B: From<Bytes>>(route: MetadataRoute) -> http::Response<B> {
    let mut response = http::Response::new(B::from(route.body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(route.content_type));
    *response.status_mut() = StatusCode::OK;
    response
}

impl<S, B, ResBody> Service<http::Request<B>> for AuthService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    B: Send + 'static,
    ResBody: From<Bytes> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = AuthServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        if let Some(route) = self.metadata_route(req.method(), req.uri().path()) {
            debug!(path = %route.path, "serving authorization metadata");
            return Box::pin(async move { Ok(metadata_response(route)) });
        }

        // the clone is not ready; keep the one poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if self.config.should_bypass(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let (parts, body) = req.into_parts();
        let inbound = InboundRequest::from_http_parts(&parts, self.config.public_origin.as_deref());
        let chain = Arc::clone(&self.chain);
        let challenge = self.challenge.clone();
        let allow_anonymous = self.config.allow_anonymous;

        Box::pin(async move {
            match chain.verify(&inbound).await {
                Ok(token) => {
                    let mut req = http::Request::from_parts(parts, body);
                    req.extensions_mut().insert(token);
                    inner.call(req).await
                }
                Err(_) if allow_anonymous => {
                    inner.call(http::Request::from_parts(parts, body)).await
                }
                Err(_) => Ok(chain.unauthorized(&challenge).into_response()),
            }
        })
    }
}
