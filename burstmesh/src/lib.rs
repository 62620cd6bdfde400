//! # Burstmesh
//!
//! A self-hosted cluster substrate: mesh membership, key-based request
//! routing and burst task dispatch to ephemeral workers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       MeshNode (node)                        │
//! │   HTTP server ── MeshService          UDP task channel       │
//! ├─────────────────────────────┬────────────────────────────────┤
//! │  mesh                       │  burst                         │
//! │  • NodeRegistry             │  • WorkerPool (double          │
//! │  • KeyIndex                 │    rendezvous, /run + /idle)   │
//! │  • RingPropagator           │  • ContainerTable (UDP slots)  │
//! │  • Router (proxy)           │  • Sessions, in-process runners│
//! ├─────────────────────────────┴────────────────────────────────┤
//! │  ClusterState: every table behind one lock                   │
//! │  Rendezvous: bounded single-slot handoff                     │
//! │  SentenceTemplate: line-oriented text encoding               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Membership changes and index batches flood to every active member.
//!   Joins and evictions are idempotent; evicted nodes stay as tombstones.
//! - The key index is eventually consistent; a batch replaces the local copy.
//! - Every rendezvous step is bounded by the runtime budget, so a vanished
//!   peer can delay a caller but never block it forever.
//!
//! ## Quick Start
//!
//! ```ignore
//! use burstmesh::prelude::*;
//!
//! let config = NodeConfig::builder().admin_key("secret").build()?;
//! let node = MeshNode::new(config).start().await?;
//! tokio::signal::ctrl_c().await?;
//! node.shutdown().await;
//! ```

#![deny(missing_docs)]

pub mod auth;
pub mod burst;
pub mod config;
pub mod error;
pub mod http;
pub mod key;
pub mod mesh;
pub mod node;
pub mod prelude;
pub mod rendezvous;
pub mod sentence;
pub mod state;
pub mod udp;

pub use config::{BurstConfig, NodeConfig, NodeConfigBuilder, NodeConfigFile, RunnerTransport};
pub use error::{ConfigError, HttpClientError, NodeError, RouteError};
pub use node::{MeshNode, MeshNodeBuilder};
pub use rendezvous::{Rendezvous, RendezvousError};
pub use state::ClusterState;
