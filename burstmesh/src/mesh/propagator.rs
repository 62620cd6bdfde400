//! Ring propagation of control messages.
//!
//! A broadcast sends one request per target concurrently and waits for all of
//! them. Failures are logged and counted, never retried: a node that misses an
//! update stays stale until a later update reaches it.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use hyper::Method;

use super::router::with_site_scheme;
use crate::http::client::{HttpClient, OutboundRequest};

/// A mutation that every member must apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// `PUT /node` with the joining address.
    Join(String),
    /// `DELETE /node` with the evicted address.
    Evict(String),
    /// `PUT /index` with a sentence-encoded index snapshot.
    Index(String),
}

impl ControlMessage {
    fn method(&self) -> Method {
        match self {
            Self::Join(_) | Self::Index(_) => Method::PUT,
            Self::Evict(_) => Method::DELETE,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Self::Join(_) | Self::Evict(_) => "/node",
            Self::Index(_) => "/index",
        }
    }

    fn body(&self) -> Bytes {
        match self {
            Self::Join(body) | Self::Evict(body) | Self::Index(body) => {
                Bytes::copy_from_slice(body.as_bytes())
            }
        }
    }
}

/// Delivery counts of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationReport {
    /// Targets that answered with a success status.
    pub delivered: usize,
    /// Targets that failed or answered with an error status.
    pub failed: usize,
}

/// Forwards control messages to mesh members, authenticated with the
/// node's admin key.
#[derive(Debug, Clone)]
pub struct RingPropagator {
    client: Arc<dyn HttpClient>,
    site_url: String,
    admin_key: String,
}

impl RingPropagator {
    /// Create a propagator. `site_url` supplies the scheme for bare addresses.
    pub fn new(
        client: Arc<dyn HttpClient>,
        site_url: impl Into<String>,
        admin_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            site_url: site_url.into(),
            admin_key: admin_key.into(),
        }
    }

    fn url_for(&self, target: &str, message: &ControlMessage) -> String {
        format!(
            "{}{}?apikey={}",
            with_site_scheme(&self.site_url, target).trim_end_matches('/'),
            message.path(),
            self.admin_key
        )
    }

    /// Send `message` to every target once.
    pub async fn broadcast(
        &self,
        targets: &[String],
        message: &ControlMessage,
    ) -> PropagationReport {
        let sends = targets.iter().map(|target| {
            let url = self.url_for(target, message);
            let request = OutboundRequest::new(message.method(), url, message.body());
            async move {
                match self.client.send(request).await {
                    Ok(response) if response.status.is_success() => true,
                    Ok(response) => {
                        tracing::warn!(
                            node = %target,
                            status = %response.status,
                            "Propagation rejected"
                        );
                        false
                    }
                    Err(e) => {
                        tracing::warn!(node = %target, error = %e, "Propagation failed");
                        false
                    }
                }
            }
        });

        let mut report = PropagationReport::default();
        for delivered in join_all(sends).await {
            if delivered {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }
        tracing::debug!(
            path = message.path(),
            delivered = report.delivered,
            failed = report.failed,
            "Control message propagated"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use hyper::StatusCode;

    use super::*;
    use crate::error::HttpClientError;
    use crate::http::client::InboundResponse;
    use crate::http::client::testing::RecordingClient;

    fn propagator(client: &Arc<RecordingClient>) -> RingPropagator {
        RingPropagator::new(client.clone(), "http://self:1", "ADMIN")
    }

    #[tokio::test]
    async fn test_join_goes_to_every_target() {
        let client = Arc::new(RecordingClient::default());
        let report = propagator(&client)
            .broadcast(
                &["a:1".to_string(), "https://b:1".to_string()],
                &ControlMessage::Join("c:1".into()),
            )
            .await;

        assert_eq!(report, PropagationReport { delivered: 2, failed: 0 });
        let sent = client.requests();
        assert_eq!(sent.len(), 2);
        let urls: Vec<&str> = sent.iter().map(|r| r.url.as_str()).collect();
        assert!(urls.contains(&"http://a:1/node?apikey=ADMIN"));
        assert!(urls.contains(&"https://b:1/node?apikey=ADMIN"));
        assert!(sent.iter().all(|r| r.method == Method::PUT && r.body == "c:1"));
    }

    #[tokio::test]
    async fn test_evict_and_index_routes() {
        let client = Arc::new(RecordingClient::default());
        let propagator = propagator(&client);
        propagator
            .broadcast(&["a:1".to_string()], &ControlMessage::Evict("b:1".into()))
            .await;
        let index = ControlMessage::Index("Api key K is served by a:1.\n".into());
        propagator.broadcast(&["a:1".to_string()], &index).await;

        let sent = client.requests();
        assert_eq!(sent[0].method, Method::DELETE);
        assert_eq!(sent[0].url, "http://a:1/node?apikey=ADMIN");
        assert_eq!(sent[1].method, Method::PUT);
        assert_eq!(sent[1].url, "http://a:1/index?apikey=ADMIN");
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_retried() {
        let client = Arc::new(RecordingClient::default());
        client.reply_with(Err(HttpClientError::Transport("refused".into())));
        client.reply_with(Ok(InboundResponse {
            status: StatusCode::UNAUTHORIZED,
            body: Bytes::new(),
        }));

        let report = propagator(&client)
            .broadcast(
                &["a:1".to_string(), "b:1".to_string(), "c:1".to_string()],
                &ControlMessage::Join("d:1".into()),
            )
            .await;
        assert_eq!(report, PropagationReport { delivered: 1, failed: 2 });
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_no_targets() {
        let client = Arc::new(RecordingClient::default());
        let report = propagator(&client)
            .broadcast(&[], &ControlMessage::Join("d:1".into()))
            .await;
        assert_eq!(report, PropagationReport::default());
        assert!(client.requests().is_empty());
    }
}
