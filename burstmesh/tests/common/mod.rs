//! Shared helpers for service-level tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Response, StatusCode};

use burstmesh::http::{HttpClient, InboundResponse, MeshService, OutboundRequest};
use burstmesh::{BurstConfig, HttpClientError, MeshNode, NodeConfig};

pub const ADMIN: &str = "ADMINKEY";
pub const SELF: &str = "self:7777";
pub const SITE: &str = "http://self:7777";

/// Records outbound requests and answers from a scripted queue
/// (`200 OK`, empty body, once the queue runs dry).
#[derive(Debug, Default)]
pub struct RecordingClient {
    sent: Mutex<Vec<OutboundRequest>>,
    replies: Mutex<VecDeque<Result<InboundResponse, HttpClientError>>>,
}

impl RecordingClient {
    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn reply_with(&self, status: StatusCode, body: &'static str) {
        self.replies.lock().unwrap().push_back(Ok(InboundResponse {
            status,
            body: Bytes::from_static(body.as_bytes()),
        }));
    }

    pub fn fail_with(&self, error: HttpClientError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }
}

#[async_trait]
impl HttpClient for RecordingClient {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse, HttpClientError> {
        self.sent.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(InboundResponse {
                status: StatusCode::OK,
                body: Bytes::new(),
            }))
    }
}

pub fn burst_config() -> BurstConfig {
    BurstConfig {
        first_warmup: Duration::ZERO,
        ..BurstConfig::with_runtime(Duration::from_millis(500))
    }
}

pub fn config() -> NodeConfig {
    NodeConfig::builder()
        .site_url(SITE)
        .advertise_address(SELF)
        .admin_key(ADMIN)
        .activation_key("ACTIVATE")
        .burst(burst_config())
        .build()
        .unwrap()
}

pub fn service() -> (Arc<RecordingClient>, MeshService) {
    let client = Arc::new(RecordingClient::default());
    let service = MeshNode::new(config())
        .with_http_client(client.clone())
        .into_service()
        .unwrap();
    (client, service)
}

pub fn request(method: Method, uri: &str, body: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(Bytes::copy_from_slice(body.as_bytes())))
        .unwrap()
}

pub fn keyed_request(method: Method, uri: &str, api_key: &str, body: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("apikey", api_key)
        .body(Full::new(Bytes::copy_from_slice(body.as_bytes())))
        .unwrap()
}

pub async fn call(service: &MeshService, request: Request<Full<Bytes>>) -> (StatusCode, String) {
    into_parts(service.handle(request).await).await
}

pub async fn into_parts(response: Response<Full<Bytes>>) -> (StatusCode, String) {
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

pub fn admin(path: &str) -> String {
    format!("{path}?apikey={ADMIN}")
}
