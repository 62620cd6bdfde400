//! MeshNode: one running mesh member.
//!
//! [`MeshNode`] binds the HTTP listener and the UDP task channel, then runs
//! the background sweeper and any in-process burst runners until shut down.
//!
//! # Builder API
//!
//! ```rust,ignore
//! let config = NodeConfig::builder()
//!     .site_url("http://10.0.0.1:7777")
//!     .admin_key(admin_key)
//!     .build()?;
//!
//! let node = MeshNode::new(config)
//!     .with_executor(Arc::new(EchoExecutor))
//!     .start()
//!     .await?;
//!
//! // ... serve until asked to stop ...
//! node.shutdown().await;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::{AdminAuthorizer, CoinValidator, NonEmptyCoin, StaticAdminKey};
use crate::burst::container::ContainerDispatcher;
use crate::burst::dispatcher::WorkerPool;
use crate::burst::executor::{EchoExecutor, TaskExecutor};
use crate::burst::worker::{HttpWorker, UdpWorker};
use crate::config::{NodeConfig, RunnerTransport};
use crate::error::{ConfigError, NodeError};
use crate::http::client::{HttpClient, HyperClient};
use crate::http::server;
use crate::http::service::MeshService;
use crate::mesh::propagator::RingPropagator;
use crate::mesh::router::Router;
use crate::state::ClusterState;
use crate::udp::client::UdpTaskClient;
use crate::udp::UdpError;
use crate::udp::server::UdpTaskServer;

/// Pause between retries of an in-process HTTP runner.
const RUNNER_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Pause between polls of an in-process UDP runner.
const RUNNER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Builder for [`MeshNode`]. Collaborators left unset get their defaults.
#[derive(Debug)]
pub struct MeshNodeBuilder {
    config: NodeConfig,
    client: Option<Arc<dyn HttpClient>>,
    admin: Option<Arc<dyn AdminAuthorizer>>,
    coins: Option<Arc<dyn CoinValidator>>,
    executor: Option<Arc<dyn TaskExecutor>>,
}

impl MeshNodeBuilder {
    /// Use `client` for propagation and forwarding instead of a [`HyperClient`].
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Gate admin endpoints with `admin` instead of [`StaticAdminKey`].
    pub fn with_admin_authorizer(mut self, admin: Arc<dyn AdminAuthorizer>) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Redeem coins with `coins` instead of [`NonEmptyCoin`].
    pub fn with_coin_validator(mut self, coins: Arc<dyn CoinValidator>) -> Self {
        self.coins = Some(coins);
        self
    }

    /// Run in-process tasks with `executor` instead of [`EchoExecutor`].
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Assemble the request handler without binding anything.
    pub fn into_service(self) -> Result<MeshService, NodeError> {
        Ok(self.assemble()?.0)
    }

    fn assemble(self) -> Result<(MeshService, Parts), NodeError> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let client = self
            .client
            .unwrap_or_else(|| Arc::new(HyperClient::new(config.http_client_timeout)));
        let admin = self
            .admin
            .unwrap_or_else(|| Arc::new(StaticAdminKey::new(config.admin_key.clone())));
        let coins = self.coins.unwrap_or_else(|| Arc::new(NonEmptyCoin));
        let executor = self.executor.unwrap_or_else(|| Arc::new(EchoExecutor));

        let state = Arc::new(ClusterState::new());
        state.join_node(config.own_address());

        let router = Router::new(
            Arc::clone(&state),
            Arc::clone(&client),
            config.site_url.clone(),
            config.own_address(),
        );
        let propagator = RingPropagator::new(
            Arc::clone(&client),
            config.site_url.clone(),
            config.admin_key.clone(),
        );
        let pool = Arc::new(WorkerPool::new(Arc::clone(&state), config.burst.clone()));
        let containers = ContainerDispatcher::new(
            Arc::clone(&state),
            config.burst.container_poll_attempts,
            config.burst.container_poll_interval,
        );
        let service = MeshService::new(
            Arc::clone(&state),
            router,
            propagator,
            pool,
            containers.clone(),
            admin,
            coins,
            Arc::clone(&config),
        );
        let parts = Parts {
            config,
            state,
            containers,
            executor,
        };
        Ok((service, parts))
    }

    /// Bind listeners and start every background task.
    ///
    /// Every socket is bound and every runner connected before any task is
    /// spawned, so a failed start leaves nothing running.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a socket cannot be bound.
    pub async fn start(self) -> Result<MeshNode, NodeError> {
        let (service, parts) = self.assemble()?;
        let config = parts.config;

        let listener = server::bind(config.http_listen).await?;
        let http_address = listener.local_addr()?;

        let udp = match config.udp_listen {
            Some(address) => {
                let udp = UdpTaskServer::bind(
                    address,
                    Arc::clone(&parts.state),
                    parts.containers,
                    config.max_datagram,
                )
                .await
                .map_err(|e| match e {
                    UdpError::Bind { address, source } => NodeError::Bind {
                        what: "udp",
                        address,
                        source,
                    },
                    other => NodeError::Io(std::io::Error::other(other.to_string())),
                })?;
                let bound = udp.local_addr().map_err(|e| std::io::Error::other(e.to_string()))?;
                Some((udp, bound))
            }
            None => None,
        };
        let udp_address = udp.as_ref().map(|(_, bound)| *bound);

        let mut runners = Vec::with_capacity(config.local_runners);
        for _ in 0..config.local_runners {
            let runner = match (config.runner_transport, udp_address) {
                (RunnerTransport::Http, _) => LocalRunner::Http(HttpWorker::new(
                    Arc::new(HyperClient::new(config.http_client_timeout)),
                    format!("http://{}", local_target(http_address)),
                    config.activation_key.clone(),
                    Arc::clone(&parts.executor),
                    RUNNER_RETRY_DELAY,
                )),
                (RunnerTransport::Udp, Some(udp_address)) => {
                    let client = UdpTaskClient::connect(
                        local_target(udp_address),
                        config.burst.max_runtime,
                        config.max_datagram,
                    )
                    .await
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
                    LocalRunner::Udp(UdpWorker::new(
                        client,
                        Arc::clone(&parts.executor),
                        RUNNER_POLL_INTERVAL,
                    ))
                }
                (RunnerTransport::Udp, None) => {
                    return Err(NodeError::Config(ConfigError::Invalid(
                        "udp runners need the UDP task channel".into(),
                    )));
                }
            };
            runners.push(runner);
        }

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::with_capacity(runners.len() + 3);
        tasks.push(tokio::spawn(server::serve(listener, service, shutdown.clone())));
        if let Some((udp, _)) = udp {
            let token = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = udp.run(token).await {
                    tracing::warn!(error = %e, "UDP task channel failed");
                }
            }));
        }
        tasks.push(tokio::spawn(sweep(
            Arc::clone(&parts.state),
            Arc::clone(&config),
            shutdown.clone(),
        )));
        for (index, runner) in runners.into_iter().enumerate() {
            tracing::debug!(
                runner = index,
                transport = ?config.runner_transport,
                "Local burst runner started"
            );
            tasks.push(tokio::spawn(runner.run(shutdown.clone())));
        }

        tracing::info!(
            node = %config.own_address(),
            %http_address,
            udp_address = ?udp_address,
            runners = config.local_runners,
            "Mesh node started"
        );
        Ok(MeshNode {
            http_address,
            udp_address,
            state: parts.state,
            shutdown,
            tasks,
        })
    }
}

/// An in-process burst runner, connected but not yet started.
enum LocalRunner {
    Http(HttpWorker),
    Udp(UdpWorker),
}

impl LocalRunner {
    async fn run(self, shutdown: CancellationToken) {
        match self {
            Self::Http(worker) => worker.run(shutdown).await,
            Self::Udp(worker) => worker.run(shutdown).await,
        }
    }
}

struct Parts {
    config: Arc<NodeConfig>,
    state: Arc<ClusterState>,
    containers: ContainerDispatcher,
    executor: Arc<dyn TaskExecutor>,
}

/// Loopback address for reaching a listener bound to a wildcard address.
fn local_target(address: SocketAddr) -> SocketAddr {
    if !address.ip().is_unspecified() {
        return address;
    }
    let loopback: std::net::IpAddr = if address.is_ipv4() {
        std::net::Ipv4Addr::LOCALHOST.into()
    } else {
        std::net::Ipv6Addr::LOCALHOST.into()
    };
    SocketAddr::new(loopback, address.port())
}

async fn sweep(state: Arc<ClusterState>, config: Arc<NodeConfig>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(config.sweep_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let report = state.sweep(
            Instant::now(),
            config.burst.pending_ttl(),
            config.burst.worker_idle_ttl,
        );
        if !report.is_empty() {
            tracing::debug!(
                sessions = report.sessions,
                pending = report.pending,
                workers = report.workers,
                "Swept stale entries"
            );
        }
    }
}

/// A started mesh node.
#[derive(Debug)]
pub struct MeshNode {
    http_address: SocketAddr,
    udp_address: Option<SocketAddr>,
    state: Arc<ClusterState>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MeshNode {
    /// Create a builder for a node with `config`.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(config: NodeConfig) -> MeshNodeBuilder {
        MeshNodeBuilder {
            config,
            client: None,
            admin: None,
            coins: None,
            executor: None,
        }
    }

    /// Bound HTTP address.
    pub fn http_address(&self) -> SocketAddr {
        self.http_address
    }

    /// Bound UDP address, if the channel is enabled.
    pub fn udp_address(&self) -> Option<SocketAddr> {
        self.udp_address
    }

    /// Shared state of the node.
    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    /// Token that stops the node when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop every task and wait for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Node task ended abnormally");
            }
        }
        tracing::info!(http_address = %self.http_address, "Mesh node stopped");
    }
}
