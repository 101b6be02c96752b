//! Gateway-side stream manager: accepts tunnels announced by SYN frames,
//! dials the requested targets, and bridges stream bytes to the sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;

use meshstream::frame::{Frame, FrameFlags};
use meshstream::stream::{Stream, StreamState};
use meshstream::transport::DatagramSender;
use meshstream::Config;

use crate::gateway::outbound::OutboundConnection;

/// One accepted tunnel: the mesh stream and its TCP counterpart.
#[derive(Clone)]
struct Tunnel {
    stream: Arc<Stream>,
    connection: Arc<OutboundConnection>,
}

pub struct GatewayStreamManager {
    config: Arc<Config>,
    transport: Arc<dyn DatagramSender>,
    tunnels: RwLock<HashMap<u32, Tunnel>>,
    decode_errors: AtomicU64,
}

impl GatewayStreamManager {
    pub fn new(config: Arc<Config>, transport: Arc<dyn DatagramSender>) -> Self {
        Self {
            config,
            transport,
            tunnels: RwLock::new(HashMap::new()),
            decode_errors: AtomicU64::new(0),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.tunnels.read().len()
    }

    /// Frames dropped because they failed to decode (short, CRC, length).
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Handle one raw datagram from a client node.
    pub async fn handle_frame(&self, from_node: u32, raw: &[u8]) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("dropping undecodable frame from node {from_node:#x}: {e}");
                return;
            }
        };

        let tunnel = self.tunnels.read().get(&frame.stream_id).cloned();

        let Some(tunnel) = tunnel else {
            if frame.is_syn() {
                self.accept_stream(frame, from_node).await;
            } else if !frame.is_rst() {
                tracing::warn!("frame for unknown stream {:#x}", frame.stream_id);
            }
            return;
        };

        tunnel.stream.receive_frame(&frame);

        // Push freshly delivered bytes straight out to the socket.
        let data = tunnel.stream.recv(65536, Some(Duration::ZERO)).await;
        if !data.is_empty() {
            tunnel.connection.send(&data).await;
        }

        if matches!(
            tunnel.stream.state(),
            StreamState::Closed | StreamState::FinRecv
        ) {
            self.cleanup_stream(frame.stream_id).await;
        }
    }

    /// SYN for an unknown stream id: parse the CONNECT request, dial the
    /// target, and either accept the stream or answer with a single RST.
    async fn accept_stream(&self, syn: Frame, from_node: u32) {
        let stream_id = syn.stream_id;

        let Some((host, port)) = parse_connect_payload(&syn.payload) else {
            tracing::warn!(
                "invalid SYN payload from node {from_node:#x}: {:?}",
                String::from_utf8_lossy(&syn.payload)
            );
            return;
        };

        tracing::info!("new stream {stream_id:#x} from node {from_node:#x}: CONNECT {host}:{port}");

        let stream = Arc::new(Stream::new(
            stream_id,
            from_node,
            self.config.clone(),
            self.transport.clone(),
        ));

        let connection = match OutboundConnection::connect(stream.clone(), &host, port).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("stream {stream_id:#x}: failed to connect to {host}:{port}: {e}");
                self.send_rst(from_node, stream_id);
                return;
            }
        };

        // Register the SYN through the normal receive path so the SYN|ACK
        // acknowledges the peer's initial seq.
        stream.receive_frame(&syn);
        if !stream.accept() {
            self.send_rst(from_node, stream_id);
            return;
        }

        connection.start_forwarding();
        self.tunnels.write().insert(
            stream_id,
            Tunnel {
                stream,
                connection: Arc::new(connection),
            },
        );
        tracing::info!("stream {stream_id:#x}: established tunnel to {host}:{port}");
    }

    fn send_rst(&self, node_id: u32, stream_id: u32) {
        let rst = Frame::data(
            stream_id,
            0,
            0,
            FrameFlags::RST,
            Bytes::from_static(b"Connection failed"),
        );
        match rst.encode() {
            Ok(encoded) => {
                self.transport.send_datagram(node_id, &encoded);
                tracing::warn!("stream {stream_id:#x}: connection failed, sent RST");
            }
            Err(e) => {
                tracing::error!("failed to encode RST: {e}");
            }
        }
    }

    async fn cleanup_stream(&self, stream_id: u32) {
        let Some(tunnel) = self.tunnels.write().remove(&stream_id) else {
            return;
        };

        // Flush bytes that arrived ahead of the FIN before dropping the
        // socket.
        let residue = tunnel.stream.recv(65536, Some(Duration::ZERO)).await;
        if !residue.is_empty() {
            tunnel.connection.send(&residue).await;
        }
        tunnel.connection.close();

        let stats = tunnel.stream.stats().snapshot();
        tracing::info!(
            sent = stats.bytes_sent,
            received = stats.bytes_received,
            retransmits = stats.retransmits,
            rtt_avg_ms = stats.rtt_avg_ms,
            "stream {stream_id:#x} closed"
        );
    }

    /// Periodic sweep: retransmit timeouts and inactivity.
    pub async fn check_streams(&self) -> meshstream::Result<()> {
        let stream_ids: Vec<u32> = self.tunnels.read().keys().copied().collect();

        for stream_id in stream_ids {
            let Some(tunnel) = self.tunnels.read().get(&stream_id).cloned() else {
                continue;
            };

            if !tunnel.stream.check_retransmits() {
                tracing::warn!("stream {stream_id:#x}: giving up, too many retransmits");
                tunnel.stream.abandon();
                self.cleanup_stream(stream_id).await;
                continue;
            }

            if tunnel.stream.is_timed_out() {
                tracing::warn!("stream {stream_id:#x}: timed out");
                tunnel.stream.reset();
                self.cleanup_stream(stream_id).await;
            }
        }
        Ok(())
    }

    /// Reset every stream and drop its connection.
    pub async fn shutdown(&self) {
        let stream_ids: Vec<u32> = self.tunnels.read().keys().copied().collect();
        for stream_id in stream_ids {
            if let Some(tunnel) = self.tunnels.read().get(&stream_id).cloned() {
                tunnel.stream.reset();
            }
            self.cleanup_stream(stream_id).await;
        }
        tracing::info!("gateway stream manager shut down");
    }
}

/// Parse a SYN payload of the form `CONNECT host:port`.
fn parse_connect_payload(payload: &[u8]) -> Option<(String, u16)> {
    let text = std::str::from_utf8(payload).ok()?;
    let target = text.strip_prefix("CONNECT ")?.trim();
    let (host, port_str) = target.rsplit_once(':')?;
    let port = port_str.parse::<u16>().ok()?;
    if host.is_empty() || port == 0 {
        return None;
    }
    Some((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_payload() {
        assert_eq!(
            parse_connect_payload(b"CONNECT example.com:443"),
            Some(("example.com".into(), 443))
        );
    }

    #[test]
    fn parses_ipv6ish_target_by_last_colon() {
        assert_eq!(
            parse_connect_payload(b"CONNECT ::1:8080"),
            Some(("::1".into(), 8080))
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(parse_connect_payload(b"").is_none());
        assert!(parse_connect_payload(b"GET example.com:80").is_none());
        assert!(parse_connect_payload(b"CONNECT example.com").is_none());
        assert!(parse_connect_payload(b"CONNECT example.com:0").is_none());
        assert!(parse_connect_payload(b"CONNECT :80").is_none());
        assert!(parse_connect_payload(&[0xFF, 0xFE]).is_none());
    }
}
