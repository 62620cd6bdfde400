//! Key-based request routing.
//!
//! A request carrying an `apikey` header belongs to whichever node the key
//! index names. The router either lets the local handlers serve it or sends
//! the whole request to the owner and relays the answer.

use std::sync::Arc;

use bytes::Bytes;
use hyper::Method;

use crate::error::RouteError;
use crate::http::client::{HttpClient, InboundResponse, OutboundRequest};
use crate::key::redact;
use crate::state::ClusterState;

/// Header marking a request that was already forwarded once.
pub const FORWARDED_HEADER: &str = "x-burstmesh-forwarded";

/// Where a keyed request should be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// This node owns the key.
    Local,
    /// Another active (or not yet known) node owns the key.
    Remote {
        /// Owner address as stored in the index.
        server: String,
    },
    /// The key is not in the index.
    Unknown,
    /// The owner was evicted.
    Gone {
        /// Address of the evicted owner.
        server: String,
    },
}

/// What [`Router::proxy`] did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// Serve the request here.
    Local,
    /// The owner answered; relay this response.
    Forwarded(InboundResponse),
}

/// Give `server` the scheme of `site_url` if it has none.
pub fn with_site_scheme(site_url: &str, server: &str) -> String {
    if server.starts_with("http://") || server.starts_with("https://") {
        return server.to_string();
    }
    let scheme = if site_url.starts_with("https://") {
        "https://"
    } else {
        "http://"
    };
    format!("{scheme}{server}")
}

/// Target URL for `path_and_query` on `server`, replacing this site's root.
pub fn rewrite_target(site_url: &str, server: &str, path_and_query: &str) -> String {
    let root = with_site_scheme(site_url, server);
    let root = root.trim_end_matches('/');
    if path_and_query.starts_with('/') {
        format!("{root}{path_and_query}")
    } else {
        format!("{root}/{path_and_query}")
    }
}

/// Resolves api keys and forwards requests to their owners.
#[derive(Debug, Clone)]
pub struct Router {
    state: Arc<ClusterState>,
    client: Arc<dyn HttpClient>,
    site_url: String,
    own_address: String,
}

impl Router {
    /// Create a router for the node at `own_address` serving `site_url`.
    pub fn new(
        state: Arc<ClusterState>,
        client: Arc<dyn HttpClient>,
        site_url: impl Into<String>,
        own_address: impl Into<String>,
    ) -> Self {
        Self {
            state,
            client,
            site_url: site_url.into(),
            own_address: own_address.into(),
        }
    }

    fn is_self(&self, server: &str) -> bool {
        let site = self.site_url.trim_end_matches('/');
        with_site_scheme(&self.site_url, server).trim_end_matches('/') == site
    }

    /// Resolve `api_key` against the index and the registry.
    pub fn resolve(&self, api_key: &str) -> Resolution {
        match self.state.resolve_key(api_key, &self.own_address) {
            Resolution::Remote { server } if self.is_self(&server) => Resolution::Local,
            resolution => resolution,
        }
    }

    /// Serve locally or forward to the owner of `api_key`.
    ///
    /// A request that was already forwarded is never forwarded again; the
    /// node it reached serves it.
    pub async fn proxy(
        &self,
        api_key: &str,
        already_forwarded: bool,
        method: Method,
        path_and_query: &str,
        body: Bytes,
    ) -> Result<ProxyOutcome, RouteError> {
        if already_forwarded {
            return Ok(ProxyOutcome::Local);
        }
        let server = match self.resolve(api_key) {
            Resolution::Local => return Ok(ProxyOutcome::Local),
            Resolution::Unknown => return Err(RouteError::NotFound),
            Resolution::Gone { server } => {
                tracing::debug!(api_key = %redact(api_key), %server, "Owner of key was evicted");
                return Err(RouteError::Gone { server });
            }
            Resolution::Remote { server } => server,
        };

        let url = rewrite_target(&self.site_url, &server, path_and_query);
        tracing::debug!(api_key = %redact(api_key), %url, "Forwarding request to key owner");
        let request = OutboundRequest::new(method, url, body)
            .header("apikey", api_key)
            .header(FORWARDED_HEADER, "1");
        match self.client.send(request).await {
            Ok(response) => Ok(ProxyOutcome::Forwarded(response)),
            Err(source) => {
                tracing::warn!(
                    api_key = %redact(api_key),
                    %server,
                    error = %source,
                    "Forwarding failed"
                );
                Err(RouteError::Forward { server, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hyper::StatusCode;

    use super::*;
    use crate::error::HttpClientError;
    use crate::http::client::testing::RecordingClient;

    fn router(client: &Arc<RecordingClient>) -> (Arc<ClusterState>, Router) {
        let state = Arc::new(ClusterState::new());
        let router = Router::new(Arc::clone(&state), client.clone(), "http://self:1", "self:1");
        (state, router)
    }

    #[test]
    fn test_with_site_scheme() {
        assert_eq!(with_site_scheme("http://s:1", "a:1"), "http://a:1");
        assert_eq!(with_site_scheme("https://s:1", "a:1"), "https://a:1");
        assert_eq!(with_site_scheme("https://s:1", "http://a:1"), "http://a:1");
    }

    #[test]
    fn test_rewrite_target() {
        assert_eq!(
            rewrite_target("http://s:1", "a:1", "/run?apikey=K"),
            "http://a:1/run?apikey=K"
        );
        assert_eq!(rewrite_target("http://s:1", "http://a:1/", "x"), "http://a:1/x");
    }

    #[tokio::test]
    async fn test_forwards_to_owner() {
        let client = Arc::new(RecordingClient::default());
        let (state, router) = router(&client);
        state.join_node("b:1");
        state.register_key("K", "b:1");
        client.reply_with(Ok(InboundResponse {
            status: StatusCode::OK,
            body: Bytes::from_static(b"from b"),
        }));

        let outcome = router
            .proxy("K", false, Method::PUT, "/run?x=1", Bytes::from_static(b"task"))
            .await
            .unwrap();
        let ProxyOutcome::Forwarded(response) = outcome else {
            panic!("expected a forward");
        };
        assert_eq!(response.body, Bytes::from_static(b"from b"));

        let sent = client.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "http://b:1/run?x=1");
        assert_eq!(sent[0].method, Method::PUT);
        assert_eq!(sent[0].body, Bytes::from_static(b"task"));
        assert!(sent[0].headers.contains(&(FORWARDED_HEADER.to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn test_local_unknown_and_gone() {
        let client = Arc::new(RecordingClient::default());
        let (state, router) = router(&client);
        state.register_key("MINE", "self:1");
        state.register_key("SITE", "http://self:1/");
        state.join_node("b:1");
        state.register_key("THEIRS", "b:1");
        state.evict_node("b:1");

        let proxy = |key: &'static str| router.proxy(key, false, Method::GET, "/", Bytes::new());
        assert_eq!(proxy("MINE").await, Ok(ProxyOutcome::Local));
        assert_eq!(proxy("SITE").await, Ok(ProxyOutcome::Local));
        assert_eq!(proxy("NONE").await, Err(RouteError::NotFound));
        assert_eq!(
            proxy("THEIRS").await,
            Err(RouteError::Gone {
                server: "b:1".into()
            })
        );
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_forwarded_request_is_served_locally() {
        let client = Arc::new(RecordingClient::default());
        let (state, router) = router(&client);
        state.register_key("K", "b:1");
        let outcome = router
            .proxy("K", true, Method::GET, "/", Bytes::new())
            .await;
        assert_eq!(outcome, Ok(ProxyOutcome::Local));
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_forward_failure_is_not_retried() {
        let client = Arc::new(RecordingClient::default());
        let (state, router) = router(&client);
        state.register_key("K", "b:1");
        client.reply_with(Err(HttpClientError::Transport("refused".into())));

        let err = router
            .proxy("K", false, Method::GET, "/", Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(client.requests().len(), 1);
    }
}
