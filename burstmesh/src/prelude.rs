//! Common imports for running and embedding a mesh node.

pub use crate::auth::{AdminAuthorizer, CoinValidator, NonEmptyCoin, StaticAdminKey};
pub use crate::burst::{BUSY_MESSAGE, EchoExecutor, TaskExecutor};
pub use crate::config::{BurstConfig, NodeConfig, NodeConfigFile, RunnerTransport};
pub use crate::error::{ConfigError, NodeError};
pub use crate::http::{HttpClient, HyperClient, MeshService};
pub use crate::node::{MeshNode, MeshNodeBuilder};
pub use crate::udp::UdpTaskClient;

pub use async_trait::async_trait;
pub use std::sync::Arc;
pub use std::time::Duration;
