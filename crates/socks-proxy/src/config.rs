//! Proxy server configuration

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Proxy server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listen address; overrides `bind_host`/`port` when set
    pub bind: Option<String>,

    /// Default bind host
    pub bind_host: IpAddr,

    /// Listen port
    pub port: u16,

    /// Logging configuration
    pub log_level: String,

    /// Handshake behaviour
    pub handshake: HandshakeConfig,

    /// Relay settings
    pub relay: RelayConfig,

    /// Timeout settings
    pub timeouts: TimeoutConfig,
}

/// Handshake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Reject method-selection requests whose version byte is not 5
    pub strict_auth_version: bool,

    /// What the CONNECT reply reports as the bound address
    pub bound_address: BoundAddressMode,
}

/// Source of BND.ADDR / BND.PORT in the CONNECT reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundAddressMode {
    /// Report the upstream peer address (the destination itself)
    Echo,
    /// Report `0.0.0.0:0`
    Unspecified,
    /// Report the upstream socket's local address
    Local,
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Size of a single read, in bytes
    pub buffer_size: usize,
}

/// Timeout configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connect timeout; unbounded when unset
    pub connect: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: None,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 1080,
            log_level: "info".to_string(),
            handshake: HandshakeConfig::default(),
            relay: RelayConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            strict_auth_version: false,
            bound_address: BoundAddressMode::Echo,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { buffer_size: 8192 }
    }
}

impl ProxyConfig {
    /// Get the listen address
    pub fn bind_address(&self) -> crate::Result<SocketAddr> {
        if let Some(addr) = &self.bind {
            addr.parse()
                .map_err(|e| crate::ProxyError::config(format!("Invalid bind address: {}", e)))
        } else {
            Ok(SocketAddr::new(self.bind_host, self.port))
        }
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> crate::Result<()> {
        self.bind_address()?;
        if self.relay.buffer_size == 0 {
            return Err(crate::ProxyError::config("relay.buffer_size must be greater than 0"));
        }
        if matches!(self.timeouts.connect, Some(d) if d.is_zero()) {
            return Err(crate::ProxyError::config("timeouts.connect must be greater than 0"));
        }
        Ok(())
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| crate::ProxyError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub async fn load_from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&content)
    }
}
