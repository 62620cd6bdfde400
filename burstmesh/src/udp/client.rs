//! UDP task channel client.
//!
//! A background reader reassembles reply frames and hands each one to the
//! waiting request through a [`Rendezvous`]. The protocol carries no request
//! ids, so requests are serialized and a request that times out retires its
//! socket: the next request goes out from a fresh local port, and a late reply
//! to the old port is never mistaken for the answer to a newer command.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::command::{UdpCommand, parse_pending_reply};
use super::frame::{FrameAssembler, encode_frame, split_frame};
use super::{RECV_BUFFER_SIZE, UdpError};
use crate::rendezvous::Rendezvous;

/// Reply to [`UdpTaskClient::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdpRunReply {
    /// The result, or the busy message.
    Done(String),
    /// Still running on this container; fetch later.
    Pending(String),
}

/// One bound socket and the task reading its replies.
#[derive(Debug)]
struct Connection {
    socket: Arc<UdpSocket>,
    replies: Rendezvous<String>,
    reader: JoinHandle<()>,
}

impl Connection {
    async fn open(server: SocketAddr, budget: Duration) -> Result<Self, UdpError> {
        let local: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| UdpError::Bind {
                address: local,
                source,
            })?;
        socket.connect(server).await?;
        let socket = Arc::new(socket);
        let replies = Rendezvous::new();
        let reader = tokio::spawn(read_replies(Arc::clone(&socket), replies.clone(), budget));
        Ok(Self {
            socket,
            replies,
            reader,
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Client side of the UDP task channel, used by containers and callers.
#[derive(Debug)]
pub struct UdpTaskClient {
    server: SocketAddr,
    connection: Mutex<Connection>,
    timeout: Duration,
    max_datagram: usize,
}

impl UdpTaskClient {
    /// Connect to the channel at `server`. Each request waits at most `timeout`.
    pub async fn connect(
        server: SocketAddr,
        timeout: Duration,
        max_datagram: usize,
    ) -> Result<Self, UdpError> {
        Ok(Self {
            server,
            connection: Mutex::new(Connection::open(server, timeout).await?),
            timeout,
            max_datagram,
        })
    }

    /// Send `command` and wait for its reply.
    ///
    /// A command whose sentence cannot be framed fails with
    /// [`UdpError::Frame`] before anything is sent.
    pub async fn request(&self, command: &UdpCommand) -> Result<String, UdpError> {
        let frame = encode_frame(&command.to_sentence())?;
        let mut connection = self.connection.lock().await;
        for datagram in split_frame(&frame, self.max_datagram) {
            connection.socket.send(&datagram).await?;
        }
        match connection.replies.recv(self.timeout).await {
            Ok(reply) => Ok(reply),
            Err(_) => {
                tracing::debug!(server = %self.server, "UDP request timed out, rebinding");
                *connection = Connection::open(self.server, self.timeout).await?;
                Err(UdpError::Timeout(self.timeout))
            }
        }
    }

    /// Obtain a container key.
    pub async fn register(&self) -> Result<String, UdpError> {
        self.request(&UdpCommand::Register).await
    }

    /// Payload to run on container `key`, if one was started.
    pub async fn poll(&self, key: &str) -> Result<Option<String>, UdpError> {
        let reply = self
            .request(&UdpCommand::Poll {
                key: key.to_string(),
            })
            .await?;
        Ok(Some(reply).filter(|payload| !payload.is_empty()))
    }

    /// Report the result of container `key`.
    pub async fn finish(&self, key: &str, result: &str) -> Result<(), UdpError> {
        self.request(&UdpCommand::Finish {
            key: key.to_string(),
            result: result.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Run `payload` on any idle container.
    pub async fn run(&self, payload: &str) -> Result<UdpRunReply, UdpError> {
        let reply = self
            .request(&UdpCommand::Run {
                payload: payload.to_string(),
            })
            .await?;
        Ok(match parse_pending_reply(&reply) {
            Some(key) => UdpRunReply::Pending(key),
            None => UdpRunReply::Done(reply),
        })
    }

    /// Result of an earlier pending run, if it finished.
    pub async fn fetch(&self, key: &str) -> Result<Option<String>, UdpError> {
        let reply = self
            .request(&UdpCommand::Fetch {
                key: key.to_string(),
            })
            .await?;
        Ok(Some(reply).filter(|result| !result.is_empty()))
    }
}

async fn read_replies(socket: Arc<UdpSocket>, replies: Rendezvous<String>, budget: Duration) {
    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
    let mut assembler = FrameAssembler::new();
    loop {
        let len = match socket.recv(&mut buffer).await {
            Ok(len) => len,
            Err(e) => {
                tracing::debug!(error = %e, "UDP reply receive failed");
                continue;
            }
        };
        match assembler.push(&buffer[..len]) {
            Ok(Some(reply)) => {
                if replies.send(reply, budget).await.is_err() {
                    tracing::debug!("Dropping UDP reply nobody waited for");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "Dropping malformed UDP reply"),
        }
    }
}
