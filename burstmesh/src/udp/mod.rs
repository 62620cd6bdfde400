//! UDP task channel for containers that cannot be reached over HTTP.
//!
//! Every message is one sentinel-framed sentence ([`frame`]) carrying one
//! [`UdpCommand`]. Replies use the same framing. There is no acknowledgement
//! or retransmission: a lost datagram shows up as a timeout on the caller.

pub mod client;
pub mod command;
pub mod frame;
pub mod server;

use std::net::SocketAddr;
use std::time::Duration;

pub use client::UdpTaskClient;
pub use command::UdpCommand;
pub use frame::{FrameAssembler, FrameError};
pub use server::UdpTaskServer;

/// Largest datagram read from the socket.
pub(crate) const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Errors on the UDP task channel.
#[derive(Debug, thiserror::Error)]
pub enum UdpError {
    /// Binding the socket failed.
    #[error("cannot bind UDP socket on {address}: {source}")]
    Bind {
        /// Requested address.
        address: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Sending or receiving failed.
    #[error("UDP I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be reassembled.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// No reply arrived in time.
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}
