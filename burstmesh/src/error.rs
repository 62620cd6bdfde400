//! Error types shared across the mesh.
//!
//! Module-local failures (rendezvous timeouts, frame and sentence parsing)
//! live next to the code that produces them; this module holds the errors
//! that cross component boundaries.

use std::time::Duration;

use hyper::StatusCode;
use thiserror::Error;

/// Errors from the outbound HTTP collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpClientError {
    /// The request could not be built (bad URL, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connecting, sending or reading failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer did not answer in time.
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout {
        /// Target URL.
        url: String,
        /// Budget that elapsed.
        timeout: Duration,
    },
}

/// Errors from resolving or forwarding a keyed request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The request carried no api key, or the key is not in the index.
    #[error("api key not found")]
    NotFound,

    /// The owning node got an eviction notice.
    #[error("owning node {server} was evicted")]
    Gone {
        /// Address of the evicted owner.
        server: String,
    },

    /// Forwarding to the owning node failed.
    #[error("forwarding to {server} failed: {source}")]
    Forward {
        /// Address of the owner.
        server: String,
        /// Underlying client error.
        source: HttpClientError,
    },
}

impl RouteError {
    /// HTTP status reported to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Gone { .. } => StatusCode::GONE,
            Self::Forward { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for [`crate::config::NodeConfigFile`].
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that stop a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Binding a listener failed.
    #[error("cannot bind {what} on {address}: {source}")]
    Bind {
        /// Which listener (http, udp).
        what: &'static str,
        /// Requested address.
        address: std::net::SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Other I/O failure on a listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_error_status() {
        assert_eq!(RouteError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            RouteError::Gone {
                server: "a:1".into()
            }
            .status(),
            StatusCode::GONE
        );
        let forward = RouteError::Forward {
            server: "a:1".into(),
            source: HttpClientError::Transport("refused".into()),
        };
        assert_eq!(forward.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            forward.to_string(),
            "forwarding to a:1 failed: transport error: refused"
        );
    }
}
