//! HTTP CONNECT proxy server: accepts local TCP clients and tunnels them
//! over mesh streams.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use meshstream::stream::{Stream, StreamState};

use crate::client::manager::ClientStreamManager;

/// Cap on the CONNECT request head we are willing to buffer.
const MAX_REQUEST_SIZE: usize = 8192;
/// Patience for the request head and for the tunnel to establish.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Poll slice for the stream-to-socket pump.
const RECV_POLL: Duration = Duration::from_millis(250);

pub struct ProxyServer {
    manager: Arc<ClientStreamManager>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: std::net::SocketAddr,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyServer {
    pub async fn bind(addr: &str, manager: Arc<ClientStreamManager>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            manager,
            listener: Mutex::new(Some(listener)),
            local_addr,
            shutdown: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Spawn the accept loop.
    pub fn start(&self) {
        let Some(listener) = self.listener.lock().take() else {
            return;
        };
        let manager = self.manager.clone();
        let shutdown = self.shutdown.clone();
        let addr = self.local_addr;

        let handle = tokio::spawn(async move {
            tracing::info!(%addr, "proxy server listening");
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((socket, peer)) => {
                                tracing::info!(%peer, "accepted proxy connection");
                                let manager = manager.clone();
                                tokio::spawn(async move {
                                    handle_connection(socket, manager).await;
                                });
                            }
                            Err(e) => {
                                tracing::error!("accept failed: {e}");
                            }
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
            tracing::info!("proxy server stopped");
        });
        *self.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

async fn handle_connection(mut socket: TcpStream, manager: Arc<ClientStreamManager>) {
    let request = match tokio::time::timeout(CONNECT_TIMEOUT, read_request_head(&mut socket)).await
    {
        Ok(Some(request)) => request,
        Ok(None) => {
            tracing::warn!("malformed or oversized request head");
            return;
        }
        Err(_) => {
            tracing::warn!("timed out reading request head");
            return;
        }
    };

    let Some((host, port)) = parse_connect_request(&request) else {
        send_response(&mut socket, 400, "Bad Request").await;
        return;
    };
    tracing::info!("CONNECT request for {host}:{port}");

    let Some(stream) = manager.create_stream(&host, port) else {
        send_response(&mut socket, 502, "Bad Gateway - Failed to create stream").await;
        return;
    };

    if !wait_for_open(&stream, CONNECT_TIMEOUT).await {
        if stream.state() == StreamState::Closed {
            send_response(&mut socket, 502, "Bad Gateway - Connection refused").await;
        } else {
            send_response(&mut socket, 504, "Gateway Timeout").await;
            stream.reset();
        }
        return;
    }

    send_response(&mut socket, 200, "Connection Established").await;
    tracing::info!("tunnel established to {host}:{port}");

    let (reader, writer) = socket.into_split();
    forward(reader, writer, stream).await;
    tracing::info!("tunnel closed");
}

/// Read until the blank line ending the request head.
async fn read_request_head(socket: &mut TcpStream) -> Option<String> {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            return Some(String::from_utf8_lossy(&data).into_owned());
        }
        if data.len() > MAX_REQUEST_SIZE {
            return None;
        }
    }
}

/// Parse the CONNECT request line into host and port.
///
/// A target without a port defaults to 443.
fn parse_connect_request(request: &str) -> Option<(String, u16)> {
    let first_line = request.lines().next()?;
    let mut parts = first_line.split_whitespace();
    let method = parts.next()?;
    if !method.eq_ignore_ascii_case("CONNECT") {
        return None;
    }
    let target = parts.next()?;

    let (host, port) = match target.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = match port_str.parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    tracing::warn!("invalid port in CONNECT request: {port_str:?}");
                    return None;
                }
            };
            (host, port)
        }
        None => (target, 443),
    };

    if host.is_empty() {
        tracing::warn!("empty host in CONNECT request");
        return None;
    }
    if port == 0 {
        tracing::warn!("port out of range in CONNECT request");
        return None;
    }
    Some((host.to_string(), port))
}

async fn wait_for_open(stream: &Stream, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        match stream.state() {
            StreamState::Open => return true,
            StreamState::Closed => return false,
            _ => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    false
}

async fn send_response(socket: &mut TcpStream, code: u16, message: &str) {
    let response = format!("HTTP/1.1 {code} {message}\r\n\r\n");
    if let Err(e) = socket.write_all(response.as_bytes()).await {
        tracing::error!("error sending HTTP response: {e}");
    }
}

/// Pump bytes both ways until either side closes.
async fn forward(mut reader: OwnedReadHalf, mut writer: OwnedWriteHalf, stream: Arc<Stream>) {
    // Client socket -> mesh stream.
    let uplink = {
        let stream = stream.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        tracing::debug!("client closed connection");
                        break;
                    }
                    Ok(n) => {
                        tracing::trace!(bytes = n, "client -> stream");
                        if stream.send(&buf[..n]) == 0 {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("error reading from client: {e}");
                        break;
                    }
                }
            }
            stream.close();
        })
    };

    // Mesh stream -> client socket.
    loop {
        let data = stream.recv(4096, Some(RECV_POLL)).await;
        if !data.is_empty() {
            tracing::trace!(bytes = data.len(), "stream -> client");
            if writer.write_all(&data).await.is_err() {
                break;
            }
        } else if !matches!(stream.state(), StreamState::Open | StreamState::SynSent) {
            break;
        }
    }

    uplink.abort();
    stream.close();
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_with_port() {
        let request = "CONNECT example.com:8443 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert_eq!(
            parse_connect_request(request),
            Some(("example.com".into(), 8443))
        );
    }

    #[test]
    fn defaults_to_https_port() {
        let request = "CONNECT example.com HTTP/1.1\r\n\r\n";
        assert_eq!(
            parse_connect_request(request),
            Some(("example.com".into(), 443))
        );
    }

    #[test]
    fn rejects_non_connect_methods() {
        assert!(parse_connect_request("GET / HTTP/1.1\r\n\r\n").is_none());
    }

    #[test]
    fn rejects_bad_targets() {
        assert!(parse_connect_request("CONNECT :443 HTTP/1.1\r\n\r\n").is_none());
        assert!(parse_connect_request("CONNECT example.com:0 HTTP/1.1\r\n\r\n").is_none());
        assert!(parse_connect_request("CONNECT example.com:notaport HTTP/1.1\r\n\r\n").is_none());
        assert!(parse_connect_request("CONNECT\r\n\r\n").is_none());
    }
}
