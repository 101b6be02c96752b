//! Radio transport adaptor.
//!
//! [`RadioLink`] is the narrow interface the bridge consumes from a mesh
//! radio: send one payload to a node id, receive payloads tagged with the
//! sender's node id. [`RadioTransport`] wraps a link for the stream layer,
//! serializing sends through one mutex — LoRa throughput makes anything
//! fancier pointless.
//!
//! [`UdpRadioLink`] is the development backend: it carries datagrams over
//! UDP between daemons on a LAN, standing in for the Meshtastic serial
//! radio which lives outside this crate.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use meshstream::transport::DatagramSender;

/// Meshtastic private application port number our frames ride on. Fixed so
/// the wire codec stays routable across deployments.
pub const PORTNUM: u32 = 256;

/// One datagram received from the mesh.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub from_node: u32,
    pub payload: Bytes,
}

/// What the bridge needs from a mesh radio.
///
/// Transmission is single-shot and unreliable: no fragmentation, no
/// hop-by-hop acknowledgment the caller could lean on. Incoming datagrams
/// are delivered out of band into an mpsc channel by the backend.
pub trait RadioLink: Send + Sync {
    /// Local mesh node id.
    fn node_id(&self) -> u32;

    /// Returns whether the radio accepted the datagram.
    fn transmit(&self, dest_node: u32, payload: &[u8]) -> bool;
}

/// Adapts a [`RadioLink`] to the stream layer's [`DatagramSender`] seam.
pub struct RadioTransport {
    link: Arc<dyn RadioLink>,
    /// Radio handle is a shared bus; sends from different streams take turns.
    tx_gate: Mutex<()>,
    datagrams_sent: AtomicU64,
    send_failures: AtomicU64,
}

impl RadioTransport {
    pub fn new(link: Arc<dyn RadioLink>) -> Arc<Self> {
        Arc::new(Self {
            link,
            tx_gate: Mutex::new(()),
            datagrams_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
        })
    }

    pub fn node_id(&self) -> u32 {
        self.link.node_id()
    }

    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }
}

impl DatagramSender for RadioTransport {
    fn send_datagram(&self, dest_node_id: u32, data: &[u8]) -> bool {
        let _gate = self.tx_gate.lock();
        let accepted = self.link.transmit(dest_node_id, data);
        if accepted {
            self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(dest = dest_node_id, len = data.len(), "datagram sent");
        } else {
            self.send_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(dest = dest_node_id, len = data.len(), "radio refused datagram");
        }
        accepted
    }
}

/// UDP datagram backend.
///
/// Each packet is the sender's node id (u32 LE) followed by the frame
/// bytes. Packets from unknown sources still surface — the managers decide
/// whether a node id is welcome.
pub struct UdpRadioLink {
    node_id: u32,
    socket: Arc<UdpSocket>,
    peers: HashMap<u32, SocketAddr>,
}

impl UdpRadioLink {
    /// Bind the backend socket.
    pub async fn bind(
        node_id: u32,
        bind: SocketAddr,
        peers: HashMap<u32, SocketAddr>,
    ) -> std::io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind).await?;
        tracing::info!("udp radio for node {node_id:#x} bound on {bind}");
        Ok(Arc::new(Self {
            node_id,
            socket: Arc::new(socket),
            peers,
        }))
    }

    /// Spawn the receive loop, delivering datagrams into `tx`.
    pub fn start_receive(&self, tx: mpsc::Sender<Datagram>) -> JoinHandle<()> {
        let socket = self.socket.clone();
        tokio::spawn(async move {
            // Node id prefix + frame; generously above the radio MTU.
            let mut buf = [0u8; 512];
            loop {
                let (len, _addr) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::error!("udp radio receive failed: {e}");
                        break;
                    }
                };
                if len < 4 {
                    tracing::debug!(len, "runt udp packet dropped");
                    continue;
                }
                let from_node = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                let datagram = Datagram {
                    from_node,
                    payload: Bytes::copy_from_slice(&buf[4..len]),
                };
                if tx.send(datagram).await.is_err() {
                    // Dispatch side is gone; stop receiving.
                    break;
                }
            }
        })
    }
}

impl RadioLink for UdpRadioLink {
    fn node_id(&self) -> u32 {
        self.node_id
    }

    fn transmit(&self, dest_node: u32, payload: &[u8]) -> bool {
        let Some(addr) = self.peers.get(&dest_node) else {
            tracing::warn!("no peer address for node {dest_node:#x}");
            return false;
        };

        let mut packet = Vec::with_capacity(4 + payload.len());
        packet.extend_from_slice(&self.node_id.to_le_bytes());
        packet.extend_from_slice(payload);

        match self.socket.try_send_to(&packet, *addr) {
            Ok(sent) if sent == packet.len() => true,
            Ok(sent) => {
                tracing::warn!(sent, expected = packet.len(), "short udp send");
                false
            }
            Err(e) => {
                tracing::warn!("udp send to {addr} failed: {e}");
                false
            }
        }
    }
}
