//! In-process burst runners.
//!
//! Normally workers are external containers. These loops do the same job
//! inside the node process, which is enough for single-box deployments and
//! for exercising the dispatch protocol end to end.
//!
//! ```text
//! HTTP:  GET /idle?apikey=<activation> ─▶ key
//!        GET /idle?apikey=<key> ... until 200 ─▶ task ─▶ execute ─▶ PUT /idle?apikey=<key>
//!        (the key is spent; register again)
//!
//! UDP:   Register ─▶ key
//!        Poll <key> ... until payload ─▶ execute ─▶ Finish <key> <result>
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::{Method, StatusCode};
use tokio_util::sync::CancellationToken;

use super::executor::TaskExecutor;
use crate::http::client::{HttpClient, OutboundRequest};
use crate::key::redact;
use crate::udp::UdpError;
use crate::udp::client::UdpTaskClient;

/// Reported in place of a result the UDP channel cannot frame.
pub const UNSENDABLE_RESULT: &str = "The result could not be sent over the task channel.";

/// Worker that long-polls the HTTP `/idle` endpoint.
#[derive(Debug, Clone)]
pub struct HttpWorker {
    client: Arc<dyn HttpClient>,
    site_url: String,
    activation_key: String,
    executor: Arc<dyn TaskExecutor>,
    retry_delay: Duration,
}

enum Poll {
    Task(String),
    Again,
    Wait,
    Reregister,
}

impl HttpWorker {
    /// Create a worker against the node at `site_url`.
    pub fn new(
        client: Arc<dyn HttpClient>,
        site_url: impl Into<String>,
        activation_key: impl Into<String>,
        executor: Arc<dyn TaskExecutor>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            site_url: site_url.into().trim_end_matches('/').to_string(),
            activation_key: activation_key.into(),
            executor,
            retry_delay,
        }
    }

    fn idle_url(&self, key: &str) -> String {
        format!("{}/idle?apikey={key}", self.site_url)
    }

    async fn register(&self) -> Option<String> {
        let url = self.idle_url(&self.activation_key);
        let request = OutboundRequest::new(Method::GET, url, Bytes::new());
        match self.client.send(request).await {
            Ok(response) if response.status == StatusCode::OK && !response.body.is_empty() => {
                Some(String::from_utf8_lossy(&response.body).into_owned())
            }
            Ok(response) => {
                tracing::warn!(status = %response.status, "Worker registration refused");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Worker registration failed");
                None
            }
        }
    }

    async fn poll(&self, key: &str) -> Poll {
        let request = OutboundRequest::new(Method::GET, self.idle_url(key), Bytes::new());
        match self.client.send(request).await {
            Ok(response) => match response.status {
                StatusCode::OK => Poll::Task(String::from_utf8_lossy(&response.body).into_owned()),
                StatusCode::NO_CONTENT => Poll::Again,
                StatusCode::TOO_EARLY => Poll::Wait,
                _ => Poll::Reregister,
            },
            Err(e) => {
                tracing::debug!(error = %e, "Worker poll failed");
                Poll::Reregister
            }
        }
    }

    async fn serve_one(&self, shutdown: &CancellationToken) -> bool {
        let Some(key) = self.register().await else {
            return false;
        };
        loop {
            let poll = tokio::select! {
                _ = shutdown.cancelled() => return true,
                poll = self.poll(&key) => poll,
            };
            match poll {
                Poll::Task(task) => {
                    let result = self.executor.execute(&task).await;
                    let post = OutboundRequest::new(Method::PUT, self.idle_url(&key), result);
                    if let Err(e) = self.client.send(post).await {
                        tracing::warn!(worker = %redact(&key), error = %e, "Posting result failed");
                    }
                    return true;
                }
                Poll::Again => {}
                Poll::Wait => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return true,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
                Poll::Reregister => return false,
            }
        }
    }

    /// Serve tasks until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::debug!(site = %self.site_url, "HTTP burst worker started");
        while !shutdown.is_cancelled() {
            if !self.serve_one(&shutdown).await {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }
        tracing::debug!("HTTP burst worker stopped");
    }
}

/// Worker that serves a container slot over the UDP task channel.
#[derive(Debug)]
pub struct UdpWorker {
    client: UdpTaskClient,
    executor: Arc<dyn TaskExecutor>,
    poll_interval: Duration,
}

impl UdpWorker {
    /// Create a worker using `client`.
    pub fn new(
        client: UdpTaskClient,
        executor: Arc<dyn TaskExecutor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            executor,
            poll_interval,
        }
    }

    async fn pause(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.poll_interval) => true,
        }
    }

    /// Report `result`, or [`UNSENDABLE_RESULT`] when it cannot be framed, so
    /// the container does not stay running on the same task.
    async fn report(&self, key: &str, result: &str) {
        let reported = match self.client.finish(key, result).await {
            Err(UdpError::Frame(e)) => {
                tracing::warn!(container = %redact(key), error = %e, "Result cannot be framed");
                self.client.finish(key, UNSENDABLE_RESULT).await
            }
            reported => reported,
        };
        if let Err(e) = reported {
            tracing::warn!(container = %redact(key), error = %e, "Reporting result failed");
        }
    }

    /// Register a container and serve it until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let key = loop {
            let registered = tokio::select! {
                _ = shutdown.cancelled() => return,
                registered = self.client.register() => registered,
            };
            match registered {
                Ok(key) if !key.is_empty() => break key,
                Ok(_) => tracing::warn!("Empty container key"),
                Err(e) => tracing::warn!(error = %e, "Container registration failed"),
            }
            if !self.pause(&shutdown).await {
                return;
            }
        };
        tracing::debug!(container = %redact(&key), "UDP burst worker registered");

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.client.poll(&key) => polled,
            };
            match polled {
                Ok(Some(task)) => {
                    let result = self.executor.execute(&task).await;
                    self.report(&key, &result).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(container = %redact(&key), error = %e, "Container poll failed")
                }
            }
            if !self.pause(&shutdown).await {
                break;
            }
        }
        tracing::debug!(container = %redact(&key), "UDP burst worker stopped");
    }
}
