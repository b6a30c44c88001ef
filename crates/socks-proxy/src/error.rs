//! Error types for the proxy server

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SOCKS5 handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Upstream connection to {target} failed: {source}")]
    UpstreamConnectionFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout")]
    Timeout,

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn upstream(target: impl Into<String>, source: std::io::Error) -> Self {
        Self::UpstreamConnectionFailed {
            target: target.into(),
            source,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<prometheus::Error> for ProxyError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}

/// Protocol violations detected while interpreting a handshake chunk.
///
/// Every variant is terminal for the connection: the client socket is closed
/// and no reply frame is sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("{stage} message too short: got {len} bytes, need at least {need}")]
    TooShort {
        stage: &'static str,
        len: usize,
        need: usize,
    },

    #[error("Unsupported SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("Unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("IPv6 destination addresses are not supported")]
    UnsupportedAddressType,

    #[error("Invalid address type: {0:#04x}")]
    InvalidAddressType(u8),

    #[error("Empty domain name")]
    EmptyDomain,

    #[error("Domain name is not valid UTF-8")]
    InvalidDomain,

    #[error("Truncated CONNECT request: got {len} bytes, need {need}")]
    Truncated { len: usize, need: usize },
}

impl HandshakeError {
    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TooShort { .. } => "too_short",
            Self::UnsupportedVersion(_) => "unsupported_version",
            Self::UnsupportedCommand(_) => "unsupported_command",
            Self::UnsupportedAddressType => "unsupported_address_type",
            Self::InvalidAddressType(_) => "invalid_address_type",
            Self::EmptyDomain => "empty_domain",
            Self::InvalidDomain => "invalid_domain",
            Self::Truncated { .. } => "truncated",
        }
    }
}
