//! The node's HTTP surface.
//!
//! | Route            | Methods    | Gate                 |
//! |------------------|------------|----------------------|
//! | `/node`          | PUT DELETE | admin                |
//! | `/index`         | PUT GET    | admin                |
//! | `/run`           | PUT POST   | active session       |
//! | `/idle`          | GET PUT    | activation/worker key|
//! | `/run.coin`      | PUT GET    | coin / session       |
//! | `/run.container` | PUT POST   | active session       |
//! | `/containers`    | GET        | admin                |
//!
//! Any request carrying an `apikey` header is first resolved through the
//! [`Router`] and may be answered by the owning node instead.

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode, Uri};
use tokio::time::Instant;

use crate::auth::{AdminAuthorizer, CoinValidator};
use crate::burst::container::{ContainerDispatcher, ContainerRun};
use crate::burst::dispatcher::{BUSY_MESSAGE, PollOutcome, RunOutcome, WorkerPool};
use crate::burst::session::{BurstSession, describe_session};
use crate::config::NodeConfig;
use crate::key::redact;
use crate::mesh::index::parse_index_batch;
use crate::mesh::propagator::{ControlMessage, RingPropagator};
use crate::mesh::registry::{EvictOutcome, JoinOutcome};
use crate::mesh::router::{FORWARDED_HEADER, ProxyOutcome, Router};
use crate::state::ClusterState;

/// Body of a `402` on `/run`.
pub const PAYMENT_REQUIRED_MESSAGE: &str = "Payment required with a PUT to /run.coin";

/// Percent-decoded value of the query parameter `name` of `uri`.
pub fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| percent_decode(value))
}

/// Decode `%XX` escapes. Malformed escapes are kept as written and invalid
/// UTF-8 is replaced.
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(high), Some(low)) = (
                bytes.get(i + 1).and_then(|b| hex_value(*b)),
                bytes.get(i + 2).and_then(|b| hex_value(*b)),
            ) {
                decoded.push((high << 4) | low);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    char::from(byte).to_digit(16).and_then(|digit| u8::try_from(digit).ok())
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn ok(body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    respond(StatusCode::OK, body)
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    respond(status, Bytes::new())
}

/// Request handler shared by every connection of a node.
#[derive(Debug, Clone)]
pub struct MeshService {
    state: Arc<ClusterState>,
    router: Router,
    propagator: RingPropagator,
    pool: Arc<WorkerPool>,
    containers: ContainerDispatcher,
    admin: Arc<dyn AdminAuthorizer>,
    coins: Arc<dyn CoinValidator>,
    config: Arc<NodeConfig>,
}

impl MeshService {
    /// Assemble the service from its parts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<ClusterState>,
        router: Router,
        propagator: RingPropagator,
        pool: Arc<WorkerPool>,
        containers: ContainerDispatcher,
        admin: Arc<dyn AdminAuthorizer>,
        coins: Arc<dyn CoinValidator>,
        config: Arc<NodeConfig>,
    ) -> Self {
        Self {
            state,
            router,
            propagator,
            pool,
            containers,
            admin,
            coins,
            config,
        }
    }

    /// Shared state behind the service.
    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    /// Answer one request.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read request body");
                return empty(StatusCode::BAD_REQUEST);
            }
        };

        if let Some(api_key) = parts.headers.get("apikey") {
            let api_key = api_key.to_str().unwrap_or_default();
            let forwarded = parts.headers.contains_key(FORWARDED_HEADER);
            let path_and_query = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            match self
                .router
                .proxy(api_key, forwarded, parts.method.clone(), path_and_query, body.clone())
                .await
            {
                Ok(ProxyOutcome::Local) => {}
                Ok(ProxyOutcome::Forwarded(response)) => {
                    return respond(response.status, response.body);
                }
                Err(e) => return respond(e.status(), e.to_string()),
            }
        }

        let method = parts.method;
        let uri = parts.uri;
        match uri.path() {
            "/node" => self.node(&method, &uri, body).await,
            "/index" => self.index(&method, &uri, body).await,
            "/run" => self.run(&method, &uri, body).await,
            "/idle" => self.idle(&method, &uri, body).await,
            "/run.coin" => self.run_coin(&method, &uri, body).await,
            "/run.container" => self.run_container(&method, &uri, body).await,
            "/containers" => self.list_containers(&method, &uri),
            _ => empty(StatusCode::NOT_FOUND),
        }
    }

    fn is_admin(&self, uri: &Uri) -> bool {
        self.admin.is_admin(query_param(uri, "apikey").as_deref())
    }

    fn has_session(&self, uri: &Uri) -> bool {
        query_param(uri, "apikey")
            .and_then(|key| self.state.active_session(&key, Instant::now()))
            .is_some()
    }

    async fn propagate(&self, message: ControlMessage) {
        let targets = self.state.propagation_targets(self.config.own_address());
        self.propagator.broadcast(&targets, &message).await;
    }

    async fn node(&self, method: &Method, uri: &Uri, body: Bytes) -> Response<Full<Bytes>> {
        if !self.is_admin(uri) {
            return empty(StatusCode::UNAUTHORIZED);
        }
        if *method != Method::PUT && *method != Method::DELETE {
            return empty(StatusCode::METHOD_NOT_ALLOWED);
        }
        let address = String::from_utf8_lossy(&body).trim().to_string();
        if address.is_empty() {
            return empty(StatusCode::NO_CONTENT);
        }

        if *method == Method::PUT {
            match self.state.join_node(&address) {
                JoinOutcome::Joined => {
                    tracing::info!(node = %address, "Node joined");
                    self.propagate(ControlMessage::Join(address)).await;
                }
                JoinOutcome::AlreadyKnown => {
                    tracing::debug!(node = %address, "Join of known node ignored");
                }
            }
            return empty(StatusCode::OK);
        }

        match self.state.evict_node(&address) {
            EvictOutcome::Unknown => empty(StatusCode::NOT_FOUND),
            EvictOutcome::AlreadyEvicted => empty(StatusCode::OK),
            EvictOutcome::Evicted => {
                tracing::info!(node = %address, "Node evicted");
                self.propagate(ControlMessage::Evict(address)).await;
                empty(StatusCode::OK)
            }
        }
    }

    async fn index(&self, method: &Method, uri: &Uri, body: Bytes) -> Response<Full<Bytes>> {
        if !self.is_admin(uri) {
            return empty(StatusCode::UNAUTHORIZED);
        }
        match *method {
            Method::GET => ok(self.state.encode_index()),
            Method::PUT => {
                let batch = parse_index_batch(&String::from_utf8_lossy(&body));
                let received = batch.entries.len();
                if self.state.replace_index(batch.entries) {
                    tracing::info!(
                        entries = received,
                        skipped = batch.skipped,
                        "Key index replaced"
                    );
                    self.propagate(ControlMessage::Index(self.state.encode_index()))
                        .await;
                }
                empty(StatusCode::OK)
            }
            _ => empty(StatusCode::METHOD_NOT_ALLOWED),
        }
    }

    async fn run(&self, method: &Method, uri: &Uri, body: Bytes) -> Response<Full<Bytes>> {
        if *method != Method::PUT && *method != Method::POST {
            return empty(StatusCode::METHOD_NOT_ALLOWED);
        }
        if !self.has_session(uri) {
            return respond(StatusCode::PAYMENT_REQUIRED, PAYMENT_REQUIRED_MESSAGE);
        }
        let task = String::from_utf8_lossy(&body).into_owned();
        match self.pool.submit(task).await {
            RunOutcome::Completed(result) => ok(result),
            RunOutcome::Busy => ok(BUSY_MESSAGE),
            RunOutcome::TimedOut => ok(Bytes::new()),
        }
    }

    async fn idle(&self, method: &Method, uri: &Uri, body: Bytes) -> Response<Full<Bytes>> {
        let Some(key) = query_param(uri, "apikey").filter(|key| !key.is_empty()) else {
            return empty(StatusCode::UNAUTHORIZED);
        };
        match *method {
            Method::GET if key == self.config.activation_key => ok(self.pool.register()),
            Method::GET => match self.pool.poll(&key).await {
                PollOutcome::Task(task) => ok(task),
                PollOutcome::NotReady => empty(StatusCode::TOO_EARLY),
                PollOutcome::NoTask => empty(StatusCode::NO_CONTENT),
                PollOutcome::Unknown => empty(StatusCode::UNAUTHORIZED),
            },
            Method::PUT => {
                let result = String::from_utf8_lossy(&body).into_owned();
                if self.pool.post_result(&key, result).await {
                    empty(StatusCode::OK)
                } else {
                    empty(StatusCode::NO_CONTENT)
                }
            }
            _ => empty(StatusCode::METHOD_NOT_ALLOWED),
        }
    }

    async fn run_coin(&self, method: &Method, uri: &Uri, body: Bytes) -> Response<Full<Bytes>> {
        match *method {
            Method::PUT => {
                let presented = query_param(uri, "apikey")
                    .filter(|coin| !coin.is_empty())
                    .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
                let Some(coin) = self.coins.validated_coin(&presented) else {
                    return empty(StatusCode::PAYMENT_REQUIRED);
                };
                let valid_for = self.config.burst.session_valid_for;
                let Some(expires_at) = Instant::now().checked_add(valid_for) else {
                    tracing::warn!(?valid_for, "Session lifetime out of range");
                    return empty(StatusCode::INTERNAL_SERVER_ERROR);
                };
                self.state.open_session(BurstSession {
                    api_key: coin.clone(),
                    descriptor: describe_session(&coin, &self.config.site_url, valid_for),
                    expires_at,
                });
                tracing::info!(api_key = %redact(&coin), "Burst session opened");
                if self.state.register_key(&coin, self.config.own_address()) {
                    self.propagate(ControlMessage::Index(self.state.encode_index()))
                        .await;
                }
                ok(coin)
            }
            Method::GET => {
                let session = query_param(uri, "apikey")
                    .and_then(|key| self.state.active_session(&key, Instant::now()));
                match session {
                    Some(session) => ok(session.descriptor),
                    None => empty(StatusCode::PAYMENT_REQUIRED),
                }
            }
            _ => empty(StatusCode::METHOD_NOT_ALLOWED),
        }
    }

    async fn run_container(
        &self,
        method: &Method,
        uri: &Uri,
        body: Bytes,
    ) -> Response<Full<Bytes>> {
        if *method != Method::PUT && *method != Method::POST {
            return empty(StatusCode::METHOD_NOT_ALLOWED);
        }
        if !self.has_session(uri) {
            return respond(StatusCode::PAYMENT_REQUIRED, PAYMENT_REQUIRED_MESSAGE);
        }
        let payload = String::from_utf8_lossy(&body);
        match self.containers.run_burst(&payload).await {
            ContainerRun::Pending { key } => {
                tokio::time::sleep(self.config.burst.deferred_fetch_delay).await;
                ok(self.containers.get_burst(&key).unwrap_or_default())
            }
            run => ok(run.into_reply()),
        }
    }

    fn list_containers(&self, method: &Method, uri: &Uri) -> Response<Full<Bytes>> {
        if !self.is_admin(uri) {
            return empty(StatusCode::UNAUTHORIZED);
        }
        if *method != Method::GET {
            return empty(StatusCode::METHOD_NOT_ALLOWED);
        }
        ok(self.state.encode_containers())
    }
}
