//! Run one mesh node.
//!
//! ```bash
//! burstmesh --site-url http://10.0.0.1:7777 --listen 0.0.0.0:7777 --admin-key <key>
//! RUST_LOG=debug burstmesh --config node.json --runners 2
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burstmesh::{MeshNode, NodeConfig, NodeConfigFile, NodeError, RunnerTransport};

/// Mesh node with burst dispatch.
#[derive(Parser, Debug)]
#[command(name = "burstmesh", version, about)]
struct Args {
    /// JSON config file; command line flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// UDP task channel listen address.
    #[arg(long)]
    udp_listen: Option<SocketAddr>,

    /// Public site root of this node.
    #[arg(long)]
    site_url: Option<String>,

    /// Administrator key shared by the mesh.
    #[arg(long)]
    admin_key: Option<String>,

    /// Activation key for burst workers.
    #[arg(long)]
    activation_key: Option<String>,

    /// Number of in-process burst runners.
    #[arg(long)]
    runners: Option<usize>,

    /// Transport of the in-process runners.
    #[arg(long, value_enum)]
    runner_transport: Option<RunnerTransport>,
}

impl Args {
    fn into_config(self) -> Result<NodeConfig, NodeError> {
        let file = match &self.config {
            Some(path) => NodeConfigFile::load(path)?,
            None => NodeConfigFile::default(),
        };
        let mut config = file.into_config()?;
        if let Some(address) = self.listen {
            config.http_listen = address;
        }
        if let Some(address) = self.udp_listen {
            config.udp_listen = Some(address);
        }
        if let Some(url) = self.site_url {
            config.site_url = url;
        }
        if let Some(key) = self.admin_key {
            config.admin_key = key;
        }
        if let Some(key) = self.activation_key {
            config.activation_key = key;
        }
        if let Some(count) = self.runners {
            config.local_runners = count;
        }
        if let Some(transport) = self.runner_transport {
            config.runner_transport = transport;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,burstmesh=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = args.into_config()?;
    tracing::info!(
        site = %config.site_url,
        listen = %config.http_listen,
        udp = ?config.udp_listen,
        "Starting burstmesh node"
    );
    tracing::debug!(admin_key = %burstmesh::key::redact(&config.admin_key), "Admin key in use");

    let node = MeshNode::new(config).start().await?;
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    node.shutdown().await;
    Ok(())
}
