//! HTTP plumbing: the inbound service and server, and the outbound client.

pub mod client;
pub mod server;
pub mod service;

pub use client::{HttpClient, HyperClient, InboundResponse, OutboundRequest};
pub use service::MeshService;
