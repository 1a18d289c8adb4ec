//! Relay server listener
//!
//! Handles the TCP accept loop, upgrades each socket to a WebSocket, and
//! spawns one connection task per viewer. The requested source id comes
//! from the upgrade path: `/stream/{id}`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::config::RelayConfig;
use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::source::SourceOpener;
use crate::store::{ConfigStore, SourceId};

/// WebSocket relay server
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Create a server with its own session registry
    pub fn new(
        config: ServerConfig,
        relay_config: RelayConfig,
        store: Arc<dyn ConfigStore>,
        opener: Arc<dyn SourceOpener>,
    ) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            registry: Arc::new(SessionRegistry::new(relay_config, store, opener)),
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the process is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Relay server listening");

        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    ///
    /// When `shutdown` resolves, the accept loop stops and every session is
    /// drained (capture handles released) before this returns.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Relay server listening");

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        self.registry.stop_all().await;

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            connection = connection_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            let _permit = permit;

            // The source id is extracted during the upgrade; unknown paths
            // are rejected before the WebSocket is established.
            let mut source_id: Option<SourceId> = None;
            let callback = |request: &Request, response: Response| {
                match parse_stream_path(request.uri().path()) {
                    Some(id) => {
                        source_id = Some(id);
                        Ok(response)
                    }
                    None => {
                        let mut rejection = ErrorResponse::new(None);
                        *rejection.status_mut() = StatusCode::NOT_FOUND;
                        Err(rejection)
                    }
                }
            };

            let ws = match accept_hdr_async(socket, callback).await {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::debug!(
                        connection = connection_id,
                        error = %e,
                        "WebSocket handshake failed"
                    );
                    return;
                }
            };

            let Some(source_id) = source_id else { return };

            let connection = Connection::new(connection_id, source_id, registry, ws);
            if let Err(e) = connection.run().await {
                tracing::debug!(
                    connection = connection_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(connection = connection_id, "Connection closed");
        });
    }
}

/// Parse `/stream/{id}` (optionally with a trailing slash) into a source id
fn parse_stream_path(path: &str) -> Option<SourceId> {
    let rest = path.strip_prefix("/stream/")?;
    let id = rest.strip_suffix('/').unwrap_or(rest);

    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(SourceId::new(id))
}
