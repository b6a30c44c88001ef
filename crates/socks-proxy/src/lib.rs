//! SOCKS5 Proxy Server Implementation
//!
//! This crate provides a minimal SOCKS5 proxy: "no authentication" method
//! selection, the CONNECT command for IPv4 and domain destinations, and a
//! plain bidirectional relay once the upstream connection is established.

pub mod config;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod socks5;

pub use config::{BoundAddressMode, ProxyConfig};
pub use error::{HandshakeError, ProxyError, Result};
pub use metrics::ProxyMetrics;
pub use relay::{RelayConnector, RelayStats};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Listening SOCKS5 proxy server
pub struct ProxyServer {
    listener: TcpListener,
    socks: socks5::Socks5Server,
}

impl ProxyServer {
    /// Validate `config` and bind the listen socket
    pub async fn bind(config: ProxyConfig) -> Result<Self> {
        config.validate()?;
        let addr = config.bind_address()?;

        let listener = TcpListener::bind(addr).await?;
        let metrics = ProxyMetrics::new()?;
        let socks = socks5::Socks5Server::new(Arc::new(config), metrics);

        info!("Starting SOCKS5 proxy server on {}", listener.local_addr()?);

        Ok(Self { listener, socks })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get server metrics
    pub fn metrics(&self) -> &ProxyMetrics {
        self.socks.metrics()
    }

    /// Accept connections until an accept error occurs
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Accept connections until `signal` resolves.
    ///
    /// Each connection runs on its own task and is unaffected by the others;
    /// connections already accepted keep running after shutdown. An accept
    /// error is returned to the caller.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutting down proxy server");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (socket, peer_addr) = accepted?;
                    info!("New SOCKS5 connection from {}", peer_addr);

                    let proxy = self.socks.clone();
                    tokio::spawn(async move {
                        match proxy.handle_connection(socket, peer_addr).await {
                            Ok(_) => {}
                            Err(ProxyError::Handshake(e)) => {
                                warn!("SOCKS5 protocol violation from {}: {}", peer_addr, e);
                            }
                            Err(e) => {
                                error!("SOCKS5 proxy error from {}: {}", peer_addr, e);
                            }
                        }
                    });
                }
            }
        }
    }
}
