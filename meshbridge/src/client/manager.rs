//! Client-side stream manager: allocates stream ids, opens tunnels toward
//! the gateway, and demultiplexes incoming frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::RngExt;

use meshstream::frame::Frame;
use meshstream::stream::{Stream, StreamState};
use meshstream::transport::DatagramSender;
use meshstream::Config;

pub struct ClientStreamManager {
    gateway_node_id: u32,
    config: Arc<Config>,
    transport: Arc<dyn DatagramSender>,
    streams: RwLock<HashMap<u32, Arc<Stream>>>,
    /// Randomized start; increments modulo 2^32, skipping the reserved 0.
    stream_id_counter: Mutex<u32>,
    decode_errors: AtomicU64,
}

impl ClientStreamManager {
    pub fn new(
        gateway_node_id: u32,
        config: Arc<Config>,
        transport: Arc<dyn DatagramSender>,
    ) -> Self {
        Self {
            gateway_node_id,
            config,
            transport,
            streams: RwLock::new(HashMap::new()),
            stream_id_counter: Mutex::new(rand::rng().random_range(1u32..=0x7FFF_FFFF)),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Frames dropped because they failed to decode (short, CRC, length).
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    fn allocate_stream_id(&self) -> u32 {
        let mut counter = self.stream_id_counter.lock();
        let stream_id = *counter;
        *counter = counter.wrapping_add(1);
        if *counter == 0 {
            *counter = 1;
        }
        stream_id
    }

    /// Open a new stream tunneling to `host:port` through the gateway.
    ///
    /// Sends a SYN whose payload is the literal `CONNECT host:port` request.
    /// Returns `None` if the target is invalid or the radio refused the SYN.
    pub fn create_stream(&self, host: &str, port: u16) -> Option<Arc<Stream>> {
        if host.is_empty() {
            tracing::warn!("refusing CONNECT with empty host");
            return None;
        }
        if port == 0 {
            tracing::warn!("refusing CONNECT with port 0");
            return None;
        }

        let stream_id = self.allocate_stream_id();
        let stream = Arc::new(Stream::new(
            stream_id,
            self.gateway_node_id,
            self.config.clone(),
            self.transport.clone(),
        ));
        self.streams.write().insert(stream_id, stream.clone());

        let connect = Bytes::from(format!("CONNECT {host}:{port}"));
        if stream.open(connect) {
            tracing::info!("stream {stream_id:#x}: SYN sent for CONNECT {host}:{port}");
            Some(stream)
        } else {
            self.streams.write().remove(&stream_id);
            None
        }
    }

    pub fn get_stream(&self, stream_id: u32) -> Option<Arc<Stream>> {
        self.streams.read().get(&stream_id).cloned()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Handle one raw datagram from the gateway.
    pub fn handle_frame(&self, from_node: u32, raw: &[u8]) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("dropping undecodable frame from node {from_node:#x}: {e}");
                return;
            }
        };

        let Some(stream) = self.get_stream(frame.stream_id) else {
            // Late RSTs for already-reaped streams are expected noise.
            if !frame.is_rst() {
                tracing::warn!("frame for unknown stream {:#x}", frame.stream_id);
            }
            return;
        };

        stream.receive_frame(&frame);
        if matches!(stream.state(), StreamState::Closed | StreamState::FinRecv) {
            self.cleanup_stream(frame.stream_id);
        }
    }

    pub fn close_stream(&self, stream_id: u32) {
        if let Some(stream) = self.get_stream(stream_id) {
            stream.close();
        }
    }

    fn cleanup_stream(&self, stream_id: u32) {
        let Some(stream) = self.streams.write().remove(&stream_id) else {
            return;
        };
        let stats = stream.stats().snapshot();
        tracing::info!(
            sent = stats.bytes_sent,
            received = stats.bytes_received,
            retransmits = stats.retransmits,
            rtt_avg_ms = stats.rtt_avg_ms,
            "stream {stream_id:#x} closed"
        );
    }

    /// Periodic sweep: retransmit timeouts and inactivity.
    pub fn check_streams(&self) -> meshstream::Result<()> {
        let stream_ids: Vec<u32> = self.streams.read().keys().copied().collect();

        for stream_id in stream_ids {
            let Some(stream) = self.get_stream(stream_id) else {
                continue;
            };

            if !stream.check_retransmits() {
                tracing::warn!("stream {stream_id:#x}: giving up, too many retransmits");
                stream.abandon();
                self.cleanup_stream(stream_id);
                continue;
            }

            if stream.is_timed_out() {
                tracing::warn!("stream {stream_id:#x}: timed out");
                stream.reset();
                self.cleanup_stream(stream_id);
            }
        }
        Ok(())
    }

    /// Reset and drop every stream.
    pub fn shutdown(&self) {
        let streams: Vec<Arc<Stream>> = {
            let mut table = self.streams.write();
            table.drain().map(|(_, stream)| stream).collect()
        };
        for stream in streams {
            stream.reset();
        }
        tracing::info!("client stream manager shut down");
    }
}
