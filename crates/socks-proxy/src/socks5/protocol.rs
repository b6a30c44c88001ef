//! SOCKS5 wire codec
//!
//! Every function here interprets exactly one chunk as exactly one message.
//! There is no reassembly across reads: a message split over two TCP reads,
//! or two messages coalesced into one read, is not handled.

use super::{
    atyp, AuthMethod, Command, ConnectRequest, Destination, HandshakeRequest, Reply, TargetAddr,
    SOCKS_VERSION,
};
use crate::error::HandshakeError;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Method-selection reply: version 5, "no authentication required"
pub const AUTH_REPLY: [u8; 2] = [SOCKS_VERSION, AuthMethod::NoAuth as u8];

/// Length of an IPv4-shaped CONNECT reply
pub const CONNECT_REPLY_LEN: usize = 10;

/// Parse a method-selection request.
///
/// The method list is consumed but not examined; the server always selects
/// "no authentication". The version byte is only checked when `strict` is set.
pub fn parse_auth(buf: &[u8], strict: bool) -> Result<HandshakeRequest, HandshakeError> {
    if buf.len() < 2 {
        return Err(HandshakeError::TooShort {
            stage: "auth",
            len: buf.len(),
            need: 2,
        });
    }

    let version = buf[0];
    if strict && version != SOCKS_VERSION {
        return Err(HandshakeError::UnsupportedVersion(version));
    }

    let method_count = buf[1];
    let methods = buf[2..]
        .iter()
        .take(method_count as usize)
        .copied()
        .collect();

    Ok(HandshakeRequest {
        version,
        method_count,
        methods,
    })
}

/// Parse a connect request.
///
/// Checks run in wire order: version, command, then address type. Only
/// CONNECT with an IPv4 or domain destination is accepted.
pub fn parse_connect(buf: &[u8]) -> Result<ConnectRequest, HandshakeError> {
    if buf.len() < 4 {
        return Err(HandshakeError::TooShort {
            stage: "connect",
            len: buf.len(),
            need: 4,
        });
    }

    let version = buf[0];
    if version != SOCKS_VERSION {
        return Err(HandshakeError::UnsupportedVersion(version));
    }

    let command = match Command::from_byte(buf[1]) {
        Some(Command::Connect) => Command::Connect,
        _ => return Err(HandshakeError::UnsupportedCommand(buf[1])),
    };

    let reserved = buf[2];
    let address_type = buf[3];

    let (address, port_offset) = match address_type {
        atyp::IPV4 => {
            require(buf, 10)?;
            let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
            (TargetAddr::Ipv4(ip), 8)
        }
        atyp::DOMAIN => {
            require(buf, 5)?;
            let len = buf[4] as usize;
            if len == 0 {
                return Err(HandshakeError::EmptyDomain);
            }
            require(buf, 5 + len + 2)?;

            let domain = std::str::from_utf8(&buf[5..5 + len])
                .map_err(|_| HandshakeError::InvalidDomain)?;
            (TargetAddr::Domain(domain.to_string()), 5 + len)
        }
        atyp::IPV6 => return Err(HandshakeError::UnsupportedAddressType),
        other => return Err(HandshakeError::InvalidAddressType(other)),
    };

    let port = u16::from_be_bytes([buf[port_offset], buf[port_offset + 1]]);

    Ok(ConnectRequest {
        version,
        command,
        reserved,
        address_type,
        destination: Destination { address, port },
    })
}

fn require(buf: &[u8], need: usize) -> Result<(), HandshakeError> {
    if buf.len() < need {
        return Err(HandshakeError::Truncated {
            len: buf.len(),
            need,
        });
    }
    Ok(())
}

/// Encode a CONNECT reply. Replies are always IPv4-shaped.
pub fn encode_connect_reply(reply: Reply, bound: SocketAddrV4) -> [u8; CONNECT_REPLY_LEN] {
    let mut out = [0u8; CONNECT_REPLY_LEN];
    out[0] = SOCKS_VERSION;
    out[1] = reply as u8;
    out[2] = 0x00;
    out[3] = atyp::IPV4;
    out[4..8].copy_from_slice(&bound.ip().octets());
    out[8..10].copy_from_slice(&bound.port().to_be_bytes());
    out
}
