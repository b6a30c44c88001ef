//! Integration tests for the SOCKS5 proxy server

use socks_proxy::{BoundAddressMode, ProxyConfig, ProxyServer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_proxy(config: ProxyConfig) -> SocketAddr {
    let config = ProxyConfig {
        bind: Some("127.0.0.1:0".to_string()),
        ..config
    };
    let server = ProxyServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.serve());
    addr
}

/// Echo server on an ephemeral port
async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

fn connect_request_ipv4(addr: SocketAddr) -> Vec<u8> {
    let ip = match addr {
        SocketAddr::V4(v4) => v4.ip().octets(),
        SocketAddr::V6(_) => panic!("IPv4 address expected"),
    };
    let mut req = vec![0x05, 0x01, 0x00, 0x01];
    req.extend_from_slice(&ip);
    req.extend_from_slice(&addr.port().to_be_bytes());
    req
}

async fn negotiate(proxy: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    timeout(IO_TIMEOUT, stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, [0x05, 0x00]);
    stream
}

async fn read_connect_reply(stream: &mut TcpStream) -> [u8; 10] {
    let mut reply = [0u8; 10];
    timeout(IO_TIMEOUT, stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    reply
}

/// The proxy closed the connection without sending anything
async fn assert_closed_without_reply(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let read = timeout(IO_TIMEOUT, stream.read(&mut buf)).await.unwrap();
    assert!(
        matches!(read, Ok(0) | Err(_)),
        "expected close, got {:?}",
        read.map(|n| buf[..n].to_vec())
    );
}

#[tokio::test]
async fn test_end_to_end_ipv4_relay() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(ProxyConfig::default()).await;

    let mut client = negotiate(proxy).await;
    client.write_all(&connect_request_ipv4(echo)).await.unwrap();

    let reply = read_connect_reply(&mut client).await;
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x00);
    assert_eq!(reply[3], 0x01);
    // Echo mode reports the destination itself
    assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
    assert_eq!(u16::from_be_bytes([reply[8], reply[9]]), echo.port());

    for message in [&b"hello"[..], &[0u8, 1, 2, 255, 254][..], &[0x05u8, 0x01, 0x00][..]] {
        client.write_all(message).await.unwrap();
        let mut echoed = vec![0u8; message.len()];
        timeout(IO_TIMEOUT, client.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, message);
    }
}

#[tokio::test]
async fn test_end_to_end_domain_relay() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(ProxyConfig::default()).await;

    let mut client = negotiate(proxy).await;
    let mut req = vec![0x05, 0x01, 0x00, 0x03, 9];
    req.extend_from_slice(b"127.0.0.1");
    req.extend_from_slice(&echo.port().to_be_bytes());
    client.write_all(&req).await.unwrap();

    let reply = read_connect_reply(&mut client).await;
    assert_eq!(reply[1], 0x00);

    client.write_all(b"via domain").await.unwrap();
    let mut echoed = [0u8; 10];
    timeout(IO_TIMEOUT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"via domain");
}

#[tokio::test]
async fn test_bound_address_unspecified() {
    let echo = start_echo_server().await;
    let mut config = ProxyConfig::default();
    config.handshake.bound_address = BoundAddressMode::Unspecified;
    let proxy = start_proxy(config).await;

    let mut client = negotiate(proxy).await;
    client.write_all(&connect_request_ipv4(echo)).await.unwrap();

    let reply = read_connect_reply(&mut client).await;
    assert_eq!(reply, [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
}

#[tokio::test]
async fn test_ipv6_closes_without_reply() {
    let proxy = start_proxy(ProxyConfig::default()).await;

    let mut client = negotiate(proxy).await;
    let mut req = vec![0x05, 0x01, 0x00, 0x04];
    req.extend_from_slice(&[0u8; 15]);
    req.push(1);
    req.extend_from_slice(&80u16.to_be_bytes());
    client.write_all(&req).await.unwrap();

    assert_closed_without_reply(&mut client).await;
}

#[tokio::test]
async fn test_invalid_address_type_closes_without_reply() {
    let proxy = start_proxy(ProxyConfig::default()).await;

    let mut client = negotiate(proxy).await;
    client
        .write_all(&[0x05, 0x01, 0x00, 0x07, 127, 0, 0, 1, 0, 80])
        .await
        .unwrap();

    assert_closed_without_reply(&mut client).await;
}

#[tokio::test]
async fn test_unsupported_commands_close_without_reply() {
    let proxy = start_proxy(ProxyConfig::default()).await;

    for command in [0x02u8, 0x03] {
        for atyp in [0x01u8, 0x03, 0x04] {
            let mut client = negotiate(proxy).await;
            client
                .write_all(&[0x05, command, 0x00, atyp, 9, 49, 50, 55, 46, 48, 0, 80])
                .await
                .unwrap();
            assert_closed_without_reply(&mut client).await;
        }
    }
}

#[tokio::test]
async fn test_bad_version_closes_without_reply() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(ProxyConfig::default()).await;

    let mut client = negotiate(proxy).await;
    let mut req = connect_request_ipv4(echo);
    req[0] = 0x04;
    client.write_all(&req).await.unwrap();

    assert_closed_without_reply(&mut client).await;
}

#[tokio::test]
async fn test_strict_auth_version_rejects_socks4_greeting() {
    let mut config = ProxyConfig::default();
    config.handshake.strict_auth_version = true;
    let proxy = start_proxy(config).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

    assert_closed_without_reply(&mut client).await;
}

#[tokio::test]
async fn test_connect_refused_closes_without_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed = listener.local_addr().unwrap();
    drop(listener);

    let proxy = start_proxy(ProxyConfig::default()).await;

    let mut client = negotiate(proxy).await;
    client.write_all(&connect_request_ipv4(closed)).await.unwrap();

    assert_closed_without_reply(&mut client).await;
}

#[tokio::test]
async fn test_client_close_closes_upstream() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let proxy = start_proxy(ProxyConfig::default()).await;

    let mut client = negotiate(proxy).await;
    client
        .write_all(&connect_request_ipv4(upstream_addr))
        .await
        .unwrap();
    let (mut upstream_side, _) = timeout(IO_TIMEOUT, upstream.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read_connect_reply(&mut client).await[1], 0x00);

    client.write_all(b"payload").await.unwrap();
    let mut received = [0u8; 7];
    timeout(IO_TIMEOUT, upstream_side.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&received, b"payload");

    drop(client);

    let mut buf = [0u8; 16];
    let read = timeout(IO_TIMEOUT, upstream_side.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_upstream_close_closes_client() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let proxy = start_proxy(ProxyConfig::default()).await;

    let mut client = negotiate(proxy).await;
    client
        .write_all(&connect_request_ipv4(upstream_addr))
        .await
        .unwrap();
    let (mut upstream_side, _) = timeout(IO_TIMEOUT, upstream.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read_connect_reply(&mut client).await[1], 0x00);

    upstream_side.write_all(b"bye").await.unwrap();
    let mut bye = [0u8; 3];
    timeout(IO_TIMEOUT, client.read_exact(&mut bye))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&bye, b"bye");

    drop(upstream_side);

    let mut buf = [0u8; 16];
    let read = timeout(IO_TIMEOUT, client.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_connections_are_independent() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(ProxyConfig::default()).await;

    // A rejected connection does not disturb one that is relaying
    let mut good = negotiate(proxy).await;
    good.write_all(&connect_request_ipv4(echo)).await.unwrap();
    assert_eq!(read_connect_reply(&mut good).await[1], 0x00);

    let mut bad = negotiate(proxy).await;
    bad.write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
        .await
        .unwrap();
    assert_closed_without_reply(&mut bad).await;

    good.write_all(b"still here").await.unwrap();
    let mut echoed = [0u8; 10];
    timeout(IO_TIMEOUT, good.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"still here");
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let config = ProxyConfig {
        bind: Some("127.0.0.1:0".to_string()),
        ..Default::default()
    };
    let server = ProxyServer::bind(config).await.unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(server.serve_with_shutdown(async {
        let _ = rx.await;
    }));
    tx.send(()).unwrap();

    let result = timeout(IO_TIMEOUT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ProxyConfig {
        bind: Some(occupied.local_addr().unwrap().to_string()),
        ..Default::default()
    };
    assert!(ProxyServer::bind(config).await.is_err());
}

#[tokio::test]
async fn test_config_file_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxy.toml");
    tokio::fs::write(
        &path,
        "bind = \"127.0.0.1:0\"\n[handshake]\nstrict_auth_version = true\n",
    )
    .await
    .unwrap();

    let config = ProxyConfig::load_from_file(&path).await.unwrap();
    assert!(config.handshake.strict_auth_version);

    let server = ProxyServer::bind(config).await.unwrap();
    assert_eq!(server.local_addr().unwrap().ip().to_string(), "127.0.0.1");
}
