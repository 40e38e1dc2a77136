//! Authenticated GET capability used to reach the provider's REST API.
//!
//! The profile fetcher only needs one primitive: "GET this URL with this
//! bearer token and give me the body". [`AuthenticatedGet`] captures that so
//! the fetcher can run against [`ReqwestTransport`] in production and an
//! in-process fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap};

/// Default request timeout in seconds.
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent sent with every provider request.
pub(crate) const USER_AGENT: &str = concat!("nextcloud-auth/", env!("CARGO_PKG_VERSION"));

/// Failure reported by an [`AuthenticatedGet`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The provider answered with a non-2xx status.
    #[error("provider responded with HTTP {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body, as returned by the provider.
        body: String,
    },

    /// The request never produced a response (DNS, TLS, connect, timeout).
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Any other failure raised by a custom transport.
    #[error("{0}")]
    Other(String),
}

/// A successful (2xx) response from the provider.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// The HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// The raw response body.
    pub body: String,
}

impl TransportResponse {
    /// Build a `200 OK` response with no headers. Handy for fakes.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Performs an HTTP GET with `Authorization: Bearer <token>`.
///
/// Implementations must return `Err` for non-2xx responses so callers never
/// see an error page as a body.
#[async_trait]
pub trait AuthenticatedGet: Send + Sync {
    /// Fetch `url` on behalf of the holder of `access_token`.
    async fn get(
        &self,
        url: &str,
        access_token: &str,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

/// [`AuthenticatedGet`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the default 30 second timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self { client }
    }

    /// Wrap an existing client, e.g. one configured with custom roots.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthenticatedGet for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        access_token: &str,
    ) -> std::result::Result<TransportResponse, TransportError> {
        tracing::debug!(url = %url, "issuing authenticated GET");

        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "provider rejected request");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(TransportResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn sends_bearer_header_not_query_param() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/ocs/v2.php/cloud/user"))
            .and(query_param("format", "json"))
            .and(header("Authorization", "Bearer token"))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new();
        let url = format!("{}/ocs/v2.php/cloud/user?format=json", server.uri());
        let response = transport.get(&url, "token").await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, "{\"ok\":true}");

        let requests = server.received_requests().await.unwrap();
        assert!(!requests[0].url.as_str().contains("access_token"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new();
        let err = transport.get(&server.uri(), "bad").await.unwrap_err();

        match err {
            TransportError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "unauthorized");
            }
            other => panic!("expected status error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_failure_is_network_error() {
        // Bind and drop a listener so the port is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = ReqwestTransport::with_timeout(Duration::from_secs(2));
        let err = transport
            .get(&format!("http://127.0.0.1:{port}/"), "token")
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Network(_)));
    }

    #[test]
    fn transport_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReqwestTransport>();
        assert_send_sync::<TransportError>();
    }
}
