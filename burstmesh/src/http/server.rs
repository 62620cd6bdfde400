//! HTTP/1.1 listener driving [`MeshService`].

use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::service::MeshService;
use crate::error::NodeError;

/// Bind the HTTP listener.
pub async fn bind(address: SocketAddr) -> Result<TcpListener, NodeError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| NodeError::Bind {
            what: "http",
            address,
            source,
        })
}

/// Accept connections until `shutdown` fires. Each connection is served on
/// its own task and closed gracefully on shutdown.
pub async fn serve(listener: TcpListener, service: MeshService, shutdown: CancellationToken) {
    tracing::info!(address = ?listener.local_addr().ok(), "HTTP listener started");
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
            },
        };

        let service = service.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let handler = service_fn(move |request: Request<Incoming>| {
                let service = service.clone();
                async move { Ok::<_, Infallible>(service.handle(request).await) }
            });
            let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), handler);
            tokio::pin!(connection);
            let result = tokio::select! {
                result = connection.as_mut() => result,
                _ = shutdown.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(e) = result {
                tracing::debug!(%peer, error = %e, "Connection ended with error");
            }
        });
    }
    tracing::info!("HTTP listener stopped");
}
