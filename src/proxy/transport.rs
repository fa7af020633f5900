//! Proxy transport layer for HTTP and SOCKS protocols
//!
//! Opens a TCP stream through a candidate proxy so a probe request can be sent over it.

use std::net::{SocketAddr, SocketAddrV4};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::socks4::Socks4Stream;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument};

use crate::error::{PacError, Result};
use crate::models::proxy::format_tcp_addr;
use crate::models::{ProxyDescriptor, ProxyProtocol};

const MAX_CONNECT_RESPONSE: usize = 8192;

/// Stream routed through a proxy
#[derive(Debug)]
pub struct ProxiedStream {
    pub stream: TcpStream,
    /// The proxy expects absolute-form request targets (plain HTTP forwarding)
    pub absolute_form: bool,
}

/// Proxy transport handler
pub struct ProxyTransport;

impl ProxyTransport {
    /// Open a route to `target_host:target_port` through the descriptor's proxy
    ///
    /// HTTP proxies are used as forward proxies; the caller must send absolute-form
    /// requests. Every other protocol yields a tunnel to the target.
    #[instrument(skip(descriptor), fields(proxy = %descriptor, target = %target_host))]
    pub async fn open(
        descriptor: &ProxyDescriptor,
        target_host: &str,
        target_port: u16,
    ) -> Result<ProxiedStream> {
        match descriptor.protocol() {
            ProxyProtocol::Http => {
                let stream = Self::dial_proxy(descriptor).await?;
                Ok(ProxiedStream {
                    stream,
                    absolute_form: true,
                })
            }
            _ => {
                let stream = Self::connect(descriptor, target_host, target_port).await?;
                Ok(ProxiedStream {
                    stream,
                    absolute_form: false,
                })
            }
        }
    }

    /// Connect to a target through the specified proxy
    pub async fn connect(
        descriptor: &ProxyDescriptor,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        let result = match descriptor.protocol() {
            ProxyProtocol::Http | ProxyProtocol::Https => {
                Self::connect_http(descriptor, target_host, target_port).await
            }
            ProxyProtocol::Socks4 => Self::connect_socks4(descriptor, target_host, target_port).await,
            ProxyProtocol::Socks5 => Self::connect_socks5(descriptor, target_host, target_port).await,
        };

        result.map_err(|e| {
            PacError::ProxyConnectionFailed(format!(
                "{} -> {}: {}",
                descriptor,
                format_tcp_addr(target_host, target_port),
                e
            ))
        })
    }

    async fn dial_proxy(descriptor: &ProxyDescriptor) -> Result<TcpStream> {
        debug!("Connecting to proxy at {}", descriptor.address());

        TcpStream::connect(descriptor.address())
            .await
            .map_err(|e| PacError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))
    }

    /// Connect through HTTP CONNECT method
    async fn connect_http(
        descriptor: &ProxyDescriptor,
        target_host: &str,
        target_port: u16,
    ) -> anyhow::Result<TcpStream> {
        let mut stream = TcpStream::connect(descriptor.address()).await?;

        let authority = format_tcp_addr(target_host, target_port);
        let request = build_connect_request(&authority);
        stream.write_all(request.as_bytes()).await?;

        let response = read_connect_response(&mut stream).await?;

        let response_str = String::from_utf8_lossy(&response);
        if !response_str.starts_with("HTTP/1.1 200") && !response_str.starts_with("HTTP/1.0 200") {
            anyhow::bail!(
                "CONNECT failed: {}",
                response_str.lines().next().unwrap_or("Unknown error")
            );
        }

        debug!("HTTP CONNECT tunnel established");
        Ok(stream)
    }

    /// Connect through SOCKS4 proxy
    ///
    /// SOCKS4 carries an IPv4 destination only, so the target is resolved locally.
    async fn connect_socks4(
        descriptor: &ProxyDescriptor,
        target_host: &str,
        target_port: u16,
    ) -> anyhow::Result<TcpStream> {
        let target_ip = tokio::net::lookup_host((target_host, target_port))
            .await?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(|| anyhow::anyhow!("no IPv4 address for {}", target_host))?;

        let socket = TcpStream::connect(descriptor.address()).await?;
        let target = SocketAddr::V4(SocketAddrV4::new(target_ip, target_port));
        let stream = Socks4Stream::connect_with_socket(socket, target).await?;

        debug!("SOCKS4 connection established");
        Ok(stream.into_inner())
    }

    /// Connect through SOCKS5 proxy
    async fn connect_socks5(
        descriptor: &ProxyDescriptor,
        target_host: &str,
        target_port: u16,
    ) -> anyhow::Result<TcpStream> {
        let socket = TcpStream::connect(descriptor.address()).await?;
        let stream = Socks5Stream::connect_with_socket(socket, (target_host, target_port)).await?;

        debug!("SOCKS5 connection established");
        Ok(stream.into_inner())
    }
}

/// Read the CONNECT reply head up to and including the blank line
///
/// Reads byte by byte so nothing past the head is taken from the tunnel.
async fn read_connect_response(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_RESPONSE {
            anyhow::bail!("CONNECT response exceeds {} bytes", MAX_CONNECT_RESPONSE);
        }
        if stream.read(&mut byte).await? == 0 {
            if head.is_empty() {
                anyhow::bail!("empty CONNECT response");
            }
            anyhow::bail!("CONNECT response truncated");
        }
        head.push(byte[0]);
    }

    Ok(head)
}

/// Build HTTP CONNECT request
fn build_connect_request(authority: &str) -> String {
    format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", authority, authority)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    async fn echo_target() -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
        });
        (addr, task)
    }

    async fn assert_round_trip(stream: &mut TcpStream) {
        stream.write_all(b"ping").await.unwrap();
        let mut out = [0u8; 4];
        timeout(Duration::from_secs(1), stream.read_exact(&mut out))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&out, b"ping");
    }

    #[test]
    fn test_build_connect_request() {
        assert_eq!(
            build_connect_request("example.com:80"),
            "CONNECT example.com:80 HTTP/1.1\r\nHost: example.com:80\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn open_http_proxy_uses_absolute_form() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let descriptor =
            ProxyDescriptor::new(ProxyProtocol::Http, &proxy_addr.to_string()).unwrap();
        let route = ProxyTransport::open(&descriptor, "example.com", 80)
            .await
            .unwrap();

        assert!(route.absolute_form);
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn connect_refused_maps_to_proxy_connection_failed() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let descriptor = ProxyDescriptor::new(ProxyProtocol::Socks5, &addr.to_string()).unwrap();
        let err = ProxyTransport::connect(&descriptor, "127.0.0.1", 80)
            .await
            .unwrap_err();
        assert!(matches!(err, PacError::ProxyConnectionFailed(_)));
    }

    #[tokio::test]
    async fn connect_via_https_proxy_tunnels_bytes() {
        let (target_addr, target_task) = echo_target().await;

        // Minimal HTTP CONNECT forward proxy.
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (mut client, _) = proxy_listener.accept().await.unwrap();

            let mut buf = vec![0u8; 2048];
            let n = client.read(&mut buf).await.unwrap();
            let req = String::from_utf8_lossy(&buf[..n]);
            assert!(req.starts_with("CONNECT 127.0.0.1:"));

            let mut server = TcpStream::connect(target_addr).await.unwrap();
            client
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await
                .unwrap();

            let mut relay_buf = [0u8; 64];
            let n = client.read(&mut relay_buf).await.unwrap();
            server.write_all(&relay_buf[..n]).await.unwrap();
            let n = server.read(&mut relay_buf).await.unwrap();
            client.write_all(&relay_buf[..n]).await.unwrap();
        });

        let descriptor =
            ProxyDescriptor::new(ProxyProtocol::Https, &proxy_addr.to_string()).unwrap();
        let mut route = ProxyTransport::open(&descriptor, "127.0.0.1", target_addr.port())
            .await
            .unwrap();
        assert!(!route.absolute_form);

        assert_round_trip(&mut route.stream).await;

        proxy_task.await.unwrap();
        target_task.await.unwrap();
    }

    #[tokio::test]
    async fn connect_via_https_proxy_consumes_split_reply() {
        let (target_addr, target_task) = echo_target().await;

        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (mut client, _) = proxy_listener.accept().await.unwrap();
            let mut buf = vec![0u8; 2048];
            let _ = client.read(&mut buf).await.unwrap();

            let mut server = TcpStream::connect(target_addr).await.unwrap();

            // Status line and headers arrive in separate segments.
            client
                .write_all(b"HTTP/1.1 200 Connection established\r\n")
                .await
                .unwrap();
            client.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            client
                .write_all(b"Proxy-Agent: fake\r\n\r\n")
                .await
                .unwrap();

            let mut relay_buf = [0u8; 64];
            let n = client.read(&mut relay_buf).await.unwrap();
            server.write_all(&relay_buf[..n]).await.unwrap();
            let n = server.read(&mut relay_buf).await.unwrap();
            client.write_all(&relay_buf[..n]).await.unwrap();
        });

        let descriptor =
            ProxyDescriptor::new(ProxyProtocol::Https, &proxy_addr.to_string()).unwrap();
        let mut stream = ProxyTransport::connect(&descriptor, "127.0.0.1", target_addr.port())
            .await
            .unwrap();

        assert_round_trip(&mut stream).await;

        proxy_task.await.unwrap();
        target_task.await.unwrap();
    }

    #[tokio::test]
    async fn connect_http_rejects_oversized_reply() {
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (mut client, _) = proxy_listener.accept().await.unwrap();
            let mut buf = vec![0u8; 2048];
            let _ = client.read(&mut buf).await.unwrap();
            let mut reply = b"HTTP/1.1 200 OK\r\nX-Padding: ".to_vec();
            reply.extend(std::iter::repeat(b'a').take(MAX_CONNECT_RESPONSE));
            let _ = client.write_all(&reply).await;
        });

        let descriptor =
            ProxyDescriptor::new(ProxyProtocol::Https, &proxy_addr.to_string()).unwrap();
        let err = ProxyTransport::connect(&descriptor, "127.0.0.1", 80)
            .await
            .unwrap_err();
        match err {
            PacError::ProxyConnectionFailed(msg) => assert!(msg.contains("exceeds")),
            other => panic!("unexpected error: {:?}", other),
        }

        proxy_task.await.unwrap();
    }

    #[tokio::test]
    async fn connect_http_rejects_non_200() {
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (mut client, _) = proxy_listener.accept().await.unwrap();
            let mut buf = vec![0u8; 2048];
            let _ = client.read(&mut buf).await.unwrap();
            client
                .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
                .await
                .unwrap();
        });

        let descriptor =
            ProxyDescriptor::new(ProxyProtocol::Https, &proxy_addr.to_string()).unwrap();
        let err = ProxyTransport::connect(&descriptor, "127.0.0.1", 80)
            .await
            .unwrap_err();
        match err {
            PacError::ProxyConnectionFailed(msg) => assert!(msg.contains("403 Forbidden")),
            other => panic!("unexpected error: {:?}", other),
        }

        proxy_task.await.unwrap();
    }

    #[tokio::test]
    async fn connect_via_socks5_proxy_tunnels_bytes() {
        let (target_addr, target_task) = echo_target().await;

        // Minimal SOCKS5 proxy without authentication.
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (mut client, _) = proxy_listener.accept().await.unwrap();

            // Greeting: VER, NMETHODS, METHODS...
            let mut header = [0u8; 2];
            client.read_exact(&mut header).await.unwrap();
            assert_eq!(header[0], 0x05);
            let mut methods = vec![0u8; header[1] as usize];
            client.read_exact(&mut methods).await.unwrap();
            assert!(methods.contains(&0x00));
            client.write_all(&[0x05, 0x00]).await.unwrap();

            // CONNECT request with an IPv4 destination.
            let mut req_head = [0u8; 4];
            client.read_exact(&mut req_head).await.unwrap();
            assert_eq!(req_head[1], 0x01);
            assert_eq!(req_head[3], 0x01);

            let mut dst_ip = [0u8; 4];
            client.read_exact(&mut dst_ip).await.unwrap();
            let mut dst_port = [0u8; 2];
            client.read_exact(&mut dst_port).await.unwrap();
            let dest = SocketAddr::from((
                std::net::Ipv4Addr::from(dst_ip),
                u16::from_be_bytes(dst_port),
            ));
            assert_eq!(dest, target_addr);

            let mut server = TcpStream::connect(dest).await.unwrap();
            client
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();

            let mut relay_buf = [0u8; 64];
            let n = client.read(&mut relay_buf).await.unwrap();
            server.write_all(&relay_buf[..n]).await.unwrap();
            let n = server.read(&mut relay_buf).await.unwrap();
            client.write_all(&relay_buf[..n]).await.unwrap();
        });

        let descriptor =
            ProxyDescriptor::new(ProxyProtocol::Socks5, &proxy_addr.to_string()).unwrap();
        let mut stream = ProxyTransport::connect(&descriptor, "127.0.0.1", target_addr.port())
            .await
            .unwrap();

        assert_round_trip(&mut stream).await;

        proxy_task.await.unwrap();
        target_task.await.unwrap();
    }

    #[tokio::test]
    async fn connect_via_socks4_proxy_tunnels_bytes() {
        let (target_addr, target_task) = echo_target().await;

        // Minimal SOCKS4 proxy.
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (mut client, _) = proxy_listener.accept().await.unwrap();

            // VN, CD, DSTPORT, DSTIP, USERID, NULL
            let mut head = [0u8; 8];
            client.read_exact(&mut head).await.unwrap();
            assert_eq!(head[0], 0x04);
            assert_eq!(head[1], 0x01);
            let port = u16::from_be_bytes([head[2], head[3]]);
            let ip = std::net::Ipv4Addr::new(head[4], head[5], head[6], head[7]);
            loop {
                let mut byte = [0u8; 1];
                client.read_exact(&mut byte).await.unwrap();
                if byte[0] == 0 {
                    break;
                }
            }
            let dest = SocketAddr::from((ip, port));
            assert_eq!(dest, target_addr);

            let mut server = TcpStream::connect(dest).await.unwrap();
            client
                .write_all(&[0x00, 0x5a, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();

            let mut relay_buf = [0u8; 64];
            let n = client.read(&mut relay_buf).await.unwrap();
            server.write_all(&relay_buf[..n]).await.unwrap();
            let n = server.read(&mut relay_buf).await.unwrap();
            client.write_all(&relay_buf[..n]).await.unwrap();
        });

        let descriptor =
            ProxyDescriptor::new(ProxyProtocol::Socks4, &proxy_addr.to_string()).unwrap();
        let mut stream = ProxyTransport::connect(&descriptor, "127.0.0.1", target_addr.port())
            .await
            .unwrap();

        assert_round_trip(&mut stream).await;

        proxy_task.await.unwrap();
        target_task.await.unwrap();
    }
}
