//! SOCKS5 proxy implementation

mod engine;
mod handler;
pub mod protocol;

pub use engine::{HandshakeEngine, Step};
pub use handler::{Outcome, Socks5Server};

use std::fmt;
use std::net::Ipv4Addr;

pub const SOCKS_VERSION: u8 = 0x05;

/// Connection stage. Advances monotonically and never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Waiting for the method-selection request
    Auth,
    /// Waiting for (or resolving) the connect request
    Connect,
    /// Raw relay, no further parsing
    Deliver,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Auth => write!(f, "auth"),
            Stage::Connect => write!(f, "connect"),
            Stage::Deliver => write!(f, "deliver"),
        }
    }
}

/// SOCKS5 authentication methods the server selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthMethod {
    NoAuth = 0x00,
}

/// SOCKS5 command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

impl Command {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Connect),
            0x02 => Some(Self::Bind),
            0x03 => Some(Self::UdpAssociate),
            _ => None,
        }
    }
}

/// Address type (ATYP) field values
pub mod atyp {
    pub const IPV4: u8 = 0x01;
    pub const DOMAIN: u8 = 0x03;
    pub const IPV6: u8 = 0x04;
}

/// Destination requested by the client.
///
/// IPv6 is not representable: such requests are rejected during parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr),
    Domain(String),
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip) => write!(f, "{}", ip),
            TargetAddr::Domain(domain) => write!(f, "{}", domain),
        }
    }
}

/// Resolved `(address, port)` handed to the relay connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address: TargetAddr,
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// SOCKS5 reply code. Failures close the connection without a reply, so
/// success is the only code ever written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Success = 0x00,
}

/// Method-selection request (AUTH stage input)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub version: u8,
    pub method_count: u8,
    /// Raw method identifiers; consumed but never examined
    pub methods: Vec<u8>,
}

/// Connect request (CONNECT stage input)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub version: u8,
    pub command: Command,
    pub reserved: u8,
    pub address_type: u8,
    pub destination: Destination,
}
