//! Outbound HTTP: the collaborator used for ring propagation, proxy
//! forwarding and in-process workers.
//!
//! [`HttpClient`] is a trait so the mesh logic can be exercised without
//! sockets; [`HyperClient`] is the production implementation on top of
//! `hyper_util`'s pooled client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::error::HttpClientError;

/// A request leaving this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute target URL.
    pub url: String,
    /// Extra headers to send.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Bytes,
}

impl OutboundRequest {
    /// Create a request without extra headers.
    pub fn new(method: Method, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// The status and body of a response received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundResponse {
    /// Response status.
    pub status: StatusCode,
    /// Full response body.
    pub body: Bytes,
}

/// Sends one request and returns the complete response.
///
/// Implementations must bound the time spent per request and must not retry.
#[async_trait]
pub trait HttpClient: Send + Sync + std::fmt::Debug {
    /// Send `request` and collect the response.
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse, HttpClientError>;
}

/// [`HttpClient`] backed by `hyper_util`'s legacy pooled client.
///
/// Plain `http://` only; TLS termination belongs to the surrounding transport.
#[derive(Debug, Clone)]
pub struct HyperClient {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HyperClient {
    /// Create a client whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            timeout,
        }
    }
}

#[async_trait]
impl HttpClient for HyperClient {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse, HttpClientError> {
        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let outgoing = builder
            .body(Full::new(request.body))
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        let exchange = async {
            let response = self
                .client
                .request(outgoing)
                .await
                .map_err(|e| HttpClientError::Transport(e.to_string()))?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| HttpClientError::Transport(e.to_string()))?
                .to_bytes();
            Ok(InboundResponse { status, body })
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(HttpClientError::Timeout {
                url: request.url,
                timeout: self.timeout,
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_request_headers() {
        let request = OutboundRequest::new(Method::PUT, "http://a:1/node", "b:1")
            .header("apikey", "K");
        assert_eq!(request.headers, vec![("apikey".to_string(), "K".to_string())]);
        assert_eq!(request.body, Bytes::from_static(b"b:1"));
    }

    #[tokio::test]
    async fn test_hyper_client_reports_unreachable_peer() {
        let client = HyperClient::new(Duration::from_secs(2));
        // Port 9 (discard) on localhost is normally closed.
        let result = client
            .send(OutboundRequest::new(Method::GET, "http://127.0.0.1:9/", Bytes::new()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_hyper_client_rejects_bad_url() {
        let client = HyperClient::new(Duration::from_secs(1));
        let result = client
            .send(OutboundRequest::new(Method::GET, "not a url", Bytes::new()))
            .await;
        assert!(matches!(result, Err(HttpClientError::InvalidRequest(_))));
    }
}
