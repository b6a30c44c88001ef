//! Upstream connection and bidirectional relay

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::socks5::{Destination, TargetAddr};
use std::future::Future;
use std::net::SocketAddrV4;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Bytes moved by one relay session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to upstream
    pub upload: u64,
    /// Upstream to client
    pub download: u64,
}

/// Opens the upstream connection and pumps bytes once it is established
#[derive(Debug, Clone)]
pub struct RelayConnector {
    connect_timeout: Option<Duration>,
    buffer_size: usize,
}

impl RelayConnector {
    pub fn new(connect_timeout: Option<Duration>, buffer_size: usize) -> Self {
        Self {
            connect_timeout,
            buffer_size,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.timeouts.connect, config.relay.buffer_size)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Open a TCP connection to `destination`.
    ///
    /// Single attempt, no retry. Domain names are handed to the connect call
    /// as-is and resolved there.
    pub async fn connect(&self, destination: &Destination) -> Result<TcpStream> {
        let attempt = async {
            match &destination.address {
                TargetAddr::Ipv4(ip) => {
                    TcpStream::connect(SocketAddrV4::new(*ip, destination.port)).await
                }
                TargetAddr::Domain(host) => {
                    TcpStream::connect((host.as_str(), destination.port)).await
                }
            }
        };

        let stream = with_connect_timeout(self.connect_timeout, attempt)
            .await?
            .map_err(|e| ProxyError::upstream(destination.to_string(), e))?;
        debug!("Connected to upstream {}", destination);
        Ok(stream)
    }

    /// Relay data between client and upstream.
    ///
    /// Returns once either side closes or errors; both sockets are closed
    /// before returning.
    pub async fn relay(&self, client: TcpStream, upstream: TcpStream) -> RelayStats {
        let (mut client_reader, mut client_writer) = client.into_split();
        let (mut upstream_reader, mut upstream_writer) = upstream.into_split();
        let mut stats = RelayStats::default();

        tokio::select! {
            _ = proxy_direction(
                &mut client_reader,
                &mut upstream_writer,
                "client->upstream",
                self.buffer_size,
                &mut stats.upload,
            ) => {}
            _ = proxy_direction(
                &mut upstream_reader,
                &mut client_writer,
                "upstream->client",
                self.buffer_size,
                &mut stats.download,
            ) => {}
        }

        let _ = upstream_writer.shutdown().await;
        let _ = client_writer.shutdown().await;

        debug!(
            "Relay closed after {} bytes up, {} bytes down",
            stats.upload, stats.download
        );
        stats
    }
}

/// Await a connect attempt, bounded by `limit` when one is set
pub(crate) async fn with_connect_timeout<F>(
    limit: Option<Duration>,
    attempt: F,
) -> Result<F::Output>
where
    F: Future,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| ProxyError::Timeout),
        None => Ok(attempt.await),
    }
}

/// Copy data in one direction until EOF or error
async fn proxy_direction<R, W>(
    reader: &mut R,
    writer: &mut W,
    direction: &str,
    buffer_size: usize,
    total_bytes: &mut u64,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];

    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => {
                debug!("Connection closed ({}) after {} bytes", direction, total_bytes);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!("Read error ({}): {}", direction, e);
                break;
            }
        };

        if let Err(e) = writer.write_all(&buffer[..n]).await {
            debug!("Write error ({}): {}", direction, e);
            break;
        }

        if let Err(e) = writer.flush().await {
            debug!("Flush error ({}): {}", direction, e);
            break;
        }

        *total_bytes += n as u64;
    }
}
