// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_io_timeout::TimeoutStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::error;

use crate::{
    modules::{
        common::proxy::{ProxyConfig, ProxyScheme},
        error::{code::ErrorCode, EngineResult},
        imap::session::SessionStream,
        utils::tls::establish_tls_stream,
    },
    raise_error,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const PROXY_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) async fn establish_tcp_connection_with_timeout(
    address: SocketAddr,
    proxy: Option<&ProxyConfig>,
) -> EngineResult<Pin<Box<TimeoutStream<TcpStream>>>> {
    let tcp_stream = connect_with_optional_proxy(proxy, address).await?;

    tcp_stream
        .set_nodelay(true)
        .map_err(|e| raise_error!(e.to_string(), ErrorCode::TransportError))?;

    let mut timeout_stream = TimeoutStream::new(tcp_stream);
    timeout_stream.set_write_timeout(Some(IDLE_TIMEOUT));
    timeout_stream.set_read_timeout(Some(IDLE_TIMEOUT));

    Ok(Box::pin(timeout_stream))
}

pub(crate) async fn establish_tls_connection(
    address: SocketAddr,
    server_hostname: &str,
    alpn_protocols: &[&str],
    proxy: Option<&ProxyConfig>,
) -> EngineResult<impl SessionStream> {
    let tcp_stream = establish_tcp_connection_with_timeout(address, proxy).await?;
    establish_tls_stream(server_hostname, alpn_protocols, tcp_stream).await
}

async fn connect_with_optional_proxy(
    proxy: Option<&ProxyConfig>,
    address: SocketAddr,
) -> EngineResult<TcpStream> {
    match proxy {
        Some(proxy) => match proxy.scheme {
            ProxyScheme::Socks5 => connect_via_socks5(proxy.addr, address).await,
            ProxyScheme::Http | ProxyScheme::Https => {
                connect_via_http_tunnel(proxy.addr, address).await
            }
        },
        None => connect_direct(address).await,
    }
}

async fn connect_direct(address: SocketAddr) -> EngineResult<TcpStream> {
    timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
        .await
        .map_err(|_| {
            error!(
                "TCP connection to {} timed out after {}s",
                address,
                CONNECT_TIMEOUT.as_secs()
            );
            raise_error!(
                format!(
                    "TCP connection to {} timed out after {}s",
                    address,
                    CONNECT_TIMEOUT.as_secs()
                ),
                ErrorCode::ConnectionTimeout
            )
        })?
        .map_err(|e| raise_error!(e.to_string(), ErrorCode::TransportError))
}

async fn connect_via_socks5(proxy_addr: SocketAddr, address: SocketAddr) -> EngineResult<TcpStream> {
    timeout(CONNECT_TIMEOUT, Socks5Stream::connect(proxy_addr, address))
        .await
        .map_err(|_| {
            error!(
                "SOCKS5 proxy connection to {} via {} timed out after {}s",
                address,
                proxy_addr,
                CONNECT_TIMEOUT.as_secs()
            );
            raise_error!(
                format!(
                    "SOCKS5 proxy connection to {} via {} timed out after {}s",
                    address,
                    proxy_addr,
                    CONNECT_TIMEOUT.as_secs()
                ),
                ErrorCode::ConnectionTimeout
            )
        })?
        .map(|s| s.into_inner())
        .map_err(|e| raise_error!(e.to_string(), ErrorCode::ProxyError))
}

/// Dials `address` through an HTTP/HTTPS forward proxy using the CONNECT method,
/// mapping the proxy's response status onto the engine's error taxonomy.
async fn connect_via_http_tunnel(
    proxy_addr: SocketAddr,
    address: SocketAddr,
) -> EngineResult<TcpStream> {
    let mut stream = connect_direct(proxy_addr).await?;

    let request = format!(
        "CONNECT {address} HTTP/1.1\r\nHost: {address}\r\nProxy-Connection: Keep-Alive\r\n\r\n"
    );

    timeout(PROXY_RESPONSE_TIMEOUT, stream.write_all(request.as_bytes()))
        .await
        .map_err(|_| {
            raise_error!(
                format!("HTTP proxy CONNECT to {} timed out", address),
                ErrorCode::ConnectionTimeout
            )
        })?
        .map_err(|e| raise_error!(e.to_string(), ErrorCode::ProxyError))?;

    let status = timeout(PROXY_RESPONSE_TIMEOUT, read_connect_status(&mut stream))
        .await
        .map_err(|_| {
            raise_error!(
                format!("HTTP proxy {} did not respond to CONNECT in time", proxy_addr),
                ErrorCode::ConnectionTimeout
            )
        })??;

    match status {
        200..=299 => Ok(stream),
        407 => Err(raise_error!(
            format!("HTTP proxy {} requires authentication", proxy_addr),
            ErrorCode::AuthRequired
        )),
        403 => Err(raise_error!(
            format!("HTTP proxy {} refused CONNECT to {}", proxy_addr, address),
            ErrorCode::PermissionDenied
        )),
        502 => Err(raise_error!(
            format!("HTTP proxy {} reported bad gateway for {}", proxy_addr, address),
            ErrorCode::BadGateway
        )),
        503 => Err(raise_error!(
            format!("HTTP proxy {} is unavailable", proxy_addr),
            ErrorCode::Unavailable
        )),
        other => Err(raise_error!(
            format!(
                "HTTP proxy {} returned unexpected status {} for CONNECT to {}",
                proxy_addr, other, address
            ),
            ErrorCode::ProxyError
        )),
    }
}

/// Reads just enough of the proxy's CONNECT response to extract the status line,
/// stopping at the end of the header block (`\r\n\r\n`).
async fn read_connect_status(stream: &mut TcpStream) -> EngineResult<u16> {
    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| raise_error!(e.to_string(), ErrorCode::ProxyError))?;
        if n == 0 {
            return Err(raise_error!(
                "HTTP proxy closed the connection before completing the CONNECT response".into(),
                ErrorCode::ProxyError
            ));
        }
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            break;
        }
        if buf.len() > 8192 {
            return Err(raise_error!(
                "HTTP proxy CONNECT response exceeded the header size limit".into(),
                ErrorCode::ProxyError
            ));
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let status_line = text
        .lines()
        .next()
        .ok_or_else(|| raise_error!("empty HTTP proxy response".into(), ErrorCode::ProxyError))?;
    let status_str = status_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| {
            raise_error!(
                format!("malformed HTTP proxy status line: {}", status_line),
                ErrorCode::ProxyError
            )
        })?;
    status_str.parse::<u16>().map_err(|_| {
        raise_error!(
            format!("malformed HTTP proxy status code: {}", status_str),
            ErrorCode::ProxyError
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn http_tunnel_rejects_407() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            let _ = socket
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await;
        });

        let target: SocketAddr = "93.184.216.34:443".parse().unwrap();
        let result = connect_via_http_tunnel(proxy_addr, target).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), ErrorCode::AuthRequired);
    }

    #[tokio::test]
    async fn http_tunnel_succeeds_on_200() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            let _ = socket
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await;
        });

        let target: SocketAddr = "93.184.216.34:443".parse().unwrap();
        let result = connect_via_http_tunnel(proxy_addr, target).await;
        assert!(result.is_ok());
    }
}
