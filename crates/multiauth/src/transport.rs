//! The transport seam
//!
//! The authorization layer never owns a connection. Every outbound call it needs
//! (discovery documents, authorization server metadata, registration, token requests)
//! is described as an [`OutgoingRequest`] and handed to an [`HttpTransport`] the caller
//! supplies, normally wrapping the same client that carries application traffic.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::trace;
use url::Url;

use crate::{AuthError, Result};

/// A request the layer wants sent
#[derive(Clone, PartialEq)]
pub struct OutgoingRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute target URL
    pub url: Url,
    /// Headers to send
    pub headers: HeaderMap,
    /// Body bytes, if any
    pub body: Option<Bytes>,
}

impl OutgoingRequest {
    /// Request with no headers or body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// `GET` accepting JSON
    pub fn get_json(url: Url) -> Self {
        let mut request = Self::new(Method::GET, url);
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        request
    }

    /// `POST` with an `application/x-www-form-urlencoded` body
    pub fn post_form<'a>(url: Url, fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let mut request = Self::new(Method::POST, url);
        request.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        request.body = Some(Bytes::from(body));
        request
    }

    /// `POST` with a JSON body
    ///
    /// # Errors
    /// Returns error if `value` cannot be serialized
    pub fn post_json<T: serde::Serialize>(url: Url, value: &T) -> Result<Self> {
        let mut request = Self::new(Method::POST, url);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        request.body = Some(Bytes::from(serde_json::to_vec(value)?));
        Ok(request)
    }

    /// Insert or replace a header
    ///
    /// # Errors
    /// Returns error if the name or value is not a valid header
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AuthError::configuration(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AuthError::configuration(format!("invalid value for header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Header value as text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl fmt::Debug for OutgoingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // headers and bodies routinely carry secrets
        f.debug_struct("OutgoingRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .finish()
    }
}

/// A response handed back to the layer
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Body bytes
    pub body: Bytes,
}

impl IncomingResponse {
    /// Response with a status and body
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Add a header (builder style, for transports and tests)
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON
    ///
    /// # Errors
    /// Returns error if the body is not valid JSON for `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as lossy UTF-8, for diagnostics
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends requests on the caller's behalf
#[async_trait]
pub trait HttpTransport: Send + Sync + fmt::Debug {
    /// Send one request and return the full response
    ///
    /// Non-2xx statuses are responses, not errors; only failures to obtain a response
    /// (connection, TLS, timeout) are errors.
    async fn send(&self, request: OutgoingRequest) -> Result<IncomingResponse>;
}

/// [`HttpTransport`] over a `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Transport with a client using `timeout` per request
    ///
    /// # Errors
    /// Returns error if the client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Share an existing client (and its connection pool)
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<IncomingResponse> {
        trace!(method = %request.method, url = %request.url, "sending auth request");
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AuthError::transport(e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::transport(format!("failed to read response body: {e}")))?;

        Ok(IncomingResponse {
            status,
            headers,
            body,
        })
    }
}

/// Send through `transport`, failing with [`AuthError::Timeout`] after `limit`
pub(crate) async fn send_with_timeout(
    transport: &dyn HttpTransport,
    request: OutgoingRequest,
    limit: Duration,
) -> Result<IncomingResponse> {
    tokio::time::timeout(limit, transport.send(request))
        .await
        .map_err(|_| AuthError::Timeout { after: limit })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_form_encodes_fields() {
        let url = Url::parse("https://auth.example.com/token").unwrap();
        let request = OutgoingRequest::post_form(
            url,
            [("grant_type", "client_credentials"), ("scope", "a b")],
        );
        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.body.as_deref(),
            Some(&b"grant_type=client_credentials&scope=a+b"[..])
        );
        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn test_debug_hides_header_values() {
        let mut request = OutgoingRequest::new(
            Method::GET,
            Url::parse("https://api.example.com/").unwrap(),
        );
        request.set_header("authorization", "Bearer secret").unwrap();
        let debug = format!("{:?}", request);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("authorization"));
    }

    #[test]
    fn test_set_header_rejects_invalid_value() {
        let mut request = OutgoingRequest::new(
            Method::GET,
            Url::parse("https://api.example.com/").unwrap(),
        );
        assert!(request.set_header("x-api-key", "bad\nvalue").is_err());
    }

    #[test]
    fn test_response_json() {
        let response = IncomingResponse::new(StatusCode::OK, r#"{"a":1}"#);
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["a"], 1);
        assert!(response.is_success());
    }

    #[derive(Debug)]
    struct SlowTransport;

    #[async_trait]
    impl HttpTransport for SlowTransport {
        async fn send(&self, _request: OutgoingRequest) -> Result<IncomingResponse> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(IncomingResponse::new(StatusCode::OK, ""))
        }
    }

    #[tokio::test]
    async fn test_send_with_timeout_expires() {
        let request = OutgoingRequest::get_json(Url::parse("https://api.example.com/").unwrap());
        let err = send_with_timeout(&SlowTransport, request, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Timeout { .. }));
    }
}
