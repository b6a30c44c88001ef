//! SOCKS5 server handler

use super::protocol::encode_connect_reply;
use super::{HandshakeEngine, Reply, Stage, Step};
use crate::{
    config::{BoundAddressMode, ProxyConfig},
    error::{ProxyError, Result},
    metrics::ProxyMetrics,
    relay::{RelayConnector, RelayStats},
};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// SOCKS5 server implementation
#[derive(Clone)]
pub struct Socks5Server {
    config: Arc<ProxyConfig>,
    connector: RelayConnector,
    metrics: ProxyMetrics,
}

/// How a connection ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handshake completed and the relay ran until one side closed
    Relayed(RelayStats),
    /// Client went away before the handshake finished
    ClientClosed(Stage),
}

impl Socks5Server {
    /// Create a new SOCKS5 server
    pub fn new(config: Arc<ProxyConfig>, metrics: ProxyMetrics) -> Self {
        let connector = RelayConnector::from_config(&config);
        Self {
            config,
            connector,
            metrics,
        }
    }

    pub fn metrics(&self) -> &ProxyMetrics {
        &self.metrics
    }

    /// Handle an incoming SOCKS5 connection.
    ///
    /// Both sockets are closed by the time this returns, whatever the outcome.
    pub async fn handle_connection(
        &self,
        client: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<Outcome> {
        self.metrics.record_connection_opened();

        let connection = Connection::new(client, peer_addr, &self.config);
        let result = connection.run(&self.connector).await;
        self.record_result(peer_addr, &result);
        result
    }

    fn record_result(&self, peer_addr: SocketAddr, result: &Result<Outcome>) {
        match result {
            Ok(Outcome::Relayed(stats)) => {
                self.metrics.record_bytes_transferred(stats.upload, "upload");
                self.metrics.record_bytes_transferred(stats.download, "download");
            }
            Ok(Outcome::ClientClosed(stage)) => {
                debug!("Client {} closed during {} stage", peer_addr, stage);
            }
            Err(ProxyError::Handshake(e)) => self.metrics.record_protocol_violation(e.kind()),
            Err(ProxyError::UpstreamConnectionFailed { .. }) | Err(ProxyError::Timeout) => {
                self.metrics.record_upstream_failure()
            }
            Err(_) => {}
        }

        self.metrics
            .record_connection_closed(matches!(result, Ok(Outcome::Relayed(_))));
    }
}

/// State owned by one accepted client
struct Connection {
    peer: SocketAddr,
    engine: HandshakeEngine,
    bound_address: BoundAddressMode,
    client: TcpStream,
    /// Present only once the CONNECT target has been reached
    upstream: Option<TcpStream>,
}

impl Connection {
    fn new(client: TcpStream, peer: SocketAddr, config: &ProxyConfig) -> Self {
        Self {
            peer,
            engine: HandshakeEngine::new(config.handshake.strict_auth_version),
            bound_address: config.handshake.bound_address,
            client,
            upstream: None,
        }
    }

    async fn run(mut self, connector: &RelayConnector) -> Result<Outcome> {
        match self.handshake(connector).await {
            Ok(true) => {
                let Connection { client, upstream, .. } = self;
                let upstream = upstream
                    .ok_or_else(|| ProxyError::internal("deliver stage without upstream socket"))?;
                Ok(Outcome::Relayed(connector.relay(client, upstream).await))
            }
            Ok(false) => {
                let stage = self.engine.stage();
                self.close().await;
                Ok(Outcome::ClientClosed(stage))
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    /// Process chunks until the upstream connection is established.
    ///
    /// Returns `false` if the client closed first. Chunks read after the
    /// CONNECT reply never reach the engine; they are pumped by
    /// [`RelayConnector::relay`].
    async fn handshake(&mut self, connector: &RelayConnector) -> Result<bool> {
        let mut buffer = vec![0u8; connector.buffer_size()];

        loop {
            let n = self.client.read(&mut buffer).await?;
            if n == 0 {
                return Ok(false);
            }

            match self.engine.on_chunk(&buffer[..n])? {
                Step::Reply(reply) => {
                    self.client.write_all(reply).await?;
                    self.client.flush().await?;
                }
                Step::Connect(destination) => {
                    info!("SOCKS5 CONNECT from {} to {}", self.peer, destination);

                    let upstream = connector.connect(&destination).await?;
                    let bound = bound_address(self.bound_address, &upstream);
                    self.upstream = Some(upstream);

                    let reply = encode_connect_reply(Reply::Success, bound);
                    self.client.write_all(&reply).await?;
                    self.client.flush().await?;
                    self.engine.upstream_connected();
                    return Ok(true);
                }
                Step::Forward => {
                    return Err(ProxyError::internal("deliver-stage chunk read during handshake"));
                }
            }
        }
    }

    /// Close the client and, if present, the upstream socket
    async fn close(mut self) {
        let _ = self.client.shutdown().await;
        if let Some(mut upstream) = self.upstream.take() {
            let _ = upstream.shutdown().await;
        }
    }
}

/// Address reported in the CONNECT reply. Replies are IPv4-shaped, so
/// anything else degrades to `0.0.0.0:0`.
fn bound_address(mode: BoundAddressMode, upstream: &TcpStream) -> SocketAddrV4 {
    let addr = match mode {
        BoundAddressMode::Echo => upstream.peer_addr().ok(),
        BoundAddressMode::Local => upstream.local_addr().ok(),
        BoundAddressMode::Unspecified => None,
    };

    match addr {
        Some(SocketAddr::V4(addr)) => addr,
        _ => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
    }
}
