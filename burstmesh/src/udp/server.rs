//! UDP task channel server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::command::{UdpCommand, pending_reply};
use super::frame::{FrameAssembler, encode_frame, split_frame};
use super::{RECV_BUFFER_SIZE, UdpError};
use crate::burst::container::{ContainerDispatcher, ContainerRun};
use crate::key::{generate_unique_key, redact};
use crate::state::ClusterState;

/// Peers with a partial frame buffered before all partial frames are dropped.
const MAX_PARTIAL_PEERS: usize = 1024;

/// Serves container registration, polling and runs over UDP.
#[derive(Debug, Clone)]
pub struct UdpTaskServer {
    socket: Arc<UdpSocket>,
    state: Arc<ClusterState>,
    containers: ContainerDispatcher,
    max_datagram: usize,
}

impl UdpTaskServer {
    /// Bind the channel on `address`.
    pub async fn bind(
        address: SocketAddr,
        state: Arc<ClusterState>,
        containers: ContainerDispatcher,
        max_datagram: usize,
    ) -> Result<Self, UdpError> {
        let socket = UdpSocket::bind(address)
            .await
            .map_err(|source| UdpError::Bind { address, source })?;
        Ok(Self {
            socket: Arc::new(socket),
            state,
            containers,
            max_datagram,
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, UdpError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive frames until `shutdown` fires. Each complete frame is handled
    /// on its own task.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), UdpError> {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let mut partial: HashMap<SocketAddr, FrameAssembler> = HashMap::new();
        tracing::info!(address = ?self.socket.local_addr().ok(), "UDP task channel listening");

        loop {
            let (len, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP errors from earlier replies surface here on some platforms.
                        tracing::debug!(error = %e, "UDP receive failed");
                        continue;
                    }
                },
            };

            if !partial.contains_key(&peer) && partial.len() >= MAX_PARTIAL_PEERS {
                tracing::warn!(peers = partial.len(), "Too many partial frames, dropping them");
                partial.clear();
            }
            let assembler = partial.entry(peer).or_default();
            let payload = match assembler.push(&buffer[..len]) {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "Dropping malformed datagram");
                    partial.remove(&peer);
                    continue;
                }
            };
            partial.remove(&peer);

            let server = self.clone();
            tokio::spawn(async move {
                let Some(reply) = server.handle(&payload).await else {
                    tracing::debug!(%peer, "Ignoring unknown UDP command");
                    return;
                };
                if let Err(e) = server.reply(peer, &reply).await {
                    tracing::warn!(%peer, error = %e, "Failed to send UDP reply");
                }
            });
        }
        tracing::info!("UDP task channel stopped");
        Ok(())
    }

    /// Execute one command. `None` means the command was not understood and
    /// gets no reply.
    pub async fn handle(&self, text: &str) -> Option<String> {
        let reply = match UdpCommand::parse(text)? {
            UdpCommand::Register => {
                let key = generate_unique_key();
                self.state.register_container(&key);
                tracing::debug!(container = %redact(&key), "Container registered");
                key
            }
            UdpCommand::Poll { key } => self.state.container_work(&key).unwrap_or_default(),
            UdpCommand::Finish { key, result } => {
                if !self.state.finish_container(&key, &result) {
                    tracing::debug!(
                        container = %redact(&key),
                        "Result for a container that is not running"
                    );
                }
                String::new()
            }
            UdpCommand::Run { payload } => match self.containers.run_burst(&payload).await {
                ContainerRun::Pending { key } => pending_reply(&key),
                run => run.into_reply(),
            },
            UdpCommand::Fetch { key } => self.containers.get_burst(&key).unwrap_or_default(),
        };
        Some(reply)
    }

    async fn reply(&self, peer: SocketAddr, payload: &str) -> Result<(), UdpError> {
        let frame = encode_frame(payload)?;
        for datagram in split_frame(&frame, self.max_datagram) {
            self.socket.send_to(&datagram, peer).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::burst::dispatcher::BUSY_MESSAGE;
    use crate::udp::command::parse_pending_reply;

    async fn server() -> (Arc<ClusterState>, UdpTaskServer) {
        let state = Arc::new(ClusterState::new());
        let containers = ContainerDispatcher::new(Arc::clone(&state), 3, Duration::from_millis(1));
        let address = "127.0.0.1:0".parse().unwrap();
        let server = UdpTaskServer::bind(address, Arc::clone(&state), containers, 1024)
            .await
            .unwrap();
        (state, server)
    }

    #[tokio::test]
    async fn test_container_lifecycle_over_commands() {
        let (_state, server) = server().await;
        assert_eq!(server.handle("Run this.x").await.as_deref(), Some(BUSY_MESSAGE));

        let key = server.handle("Burst container asks for a key.").await.unwrap();
        assert_eq!(key.len(), crate::key::KEY_LENGTH);

        let poll = format!("Burst container {key} asks for work.");
        assert_eq!(server.handle(&poll).await.as_deref(), Some(""));

        let reply = server.handle("Run this.echo").await.unwrap();
        assert_eq!(parse_pending_reply(&reply).as_deref(), Some(key.as_str()));
        assert_eq!(server.handle(&poll).await.as_deref(), Some("echo"));

        let fetch = format!("Fetch the result of burst {key}.");
        assert_eq!(server.handle(&fetch).await.as_deref(), Some(""));
        server
            .handle(&format!("Burst container {key} finished with the following result done"))
            .await;
        assert_eq!(server.handle(&fetch).await.as_deref(), Some("done"));
        assert_eq!(server.handle(&fetch).await.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_unknown_command_has_no_reply() {
        let (_state, server) = server().await;
        assert_eq!(server.handle("What is this?").await, None);
    }

    #[tokio::test]
    async fn test_reply_with_end_sentinel_is_not_sent() {
        let (_state, server) = server().await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let result = format!("print('{}')", crate::udp::frame::END_SENTINEL);

        let err = server
            .reply(peer.local_addr().unwrap(), &result)
            .await
            .unwrap_err();
        assert!(matches!(err, UdpError::Frame(_)));

        server.reply(peer.local_addr().unwrap(), "fine").await.unwrap();
        let mut buffer = [0u8; 256];
        let len = peer.recv(&mut buffer).await.unwrap();
        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.push(&buffer[..len]), Ok(Some("fine".to_string())));
    }
}
