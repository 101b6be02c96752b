//! End-to-end bridge tests: client manager and gateway manager talking over
//! an in-process radio pair, with real TCP sockets on the gateway side.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use meshbridge::client::ClientStreamManager;
use meshbridge::gateway::GatewayStreamManager;
use meshbridge::radio::{Datagram, RadioLink, RadioTransport};
use meshstream::stream::{Stream, StreamState};
use meshstream::Config;

const CLIENT_NODE: u32 = 0x11;
const GATEWAY_NODE: u32 = 0x22;

/// Radio backend that drops datagrams straight into the peer's inbox.
struct ChannelRadio {
    node_id: u32,
    peer_inbox: mpsc::Sender<Datagram>,
}

impl RadioLink for ChannelRadio {
    fn node_id(&self) -> u32 {
        self.node_id
    }

    fn transmit(&self, _dest_node: u32, payload: &[u8]) -> bool {
        self.peer_inbox
            .try_send(Datagram {
                from_node: self.node_id,
                payload: Bytes::copy_from_slice(payload),
            })
            .is_ok()
    }
}

struct Bridge {
    client: Arc<ClientStreamManager>,
    gateway: Arc<GatewayStreamManager>,
}

/// Stand up both managers with dispatch tasks shuttling datagrams between
/// them.
fn start_bridge(config: Config) -> Bridge {
    let config = Arc::new(config);
    let (client_tx, mut client_rx) = mpsc::channel::<Datagram>(1024);
    let (gateway_tx, mut gateway_rx) = mpsc::channel::<Datagram>(1024);

    let client_link = Arc::new(ChannelRadio {
        node_id: CLIENT_NODE,
        peer_inbox: gateway_tx,
    });
    let gateway_link = Arc::new(ChannelRadio {
        node_id: GATEWAY_NODE,
        peer_inbox: client_tx,
    });

    let client = Arc::new(ClientStreamManager::new(
        GATEWAY_NODE,
        config.clone(),
        RadioTransport::new(client_link),
    ));
    let gateway = Arc::new(GatewayStreamManager::new(
        config,
        RadioTransport::new(gateway_link),
    ));

    {
        let client = client.clone();
        tokio::spawn(async move {
            while let Some(datagram) = client_rx.recv().await {
                client.handle_frame(datagram.from_node, &datagram.payload);
            }
        });
    }
    {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            while let Some(datagram) = gateway_rx.recv().await {
                gateway.handle_frame(datagram.from_node, &datagram.payload).await;
            }
        });
    }

    Bridge { client, gateway }
}

fn eager_config() -> Config {
    Config {
        ack_every_n: 1,
        ..Config::default()
    }
}

/// Echo server on an ephemeral port.
async fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn recv_exact(stream: &Stream, len: usize, timeout: Duration) -> Vec<u8> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut out = Vec::new();
    while out.len() < len && tokio::time::Instant::now() < deadline {
        let chunk = stream.recv(4096, Some(Duration::from_millis(100))).await;
        if chunk.is_empty() {
            if matches!(stream.state(), StreamState::Closed | StreamState::FinRecv) {
                break;
            }
        } else {
            out.extend_from_slice(&chunk);
        }
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tunnel_echo_roundtrip() {
    let bridge = start_bridge(eager_config());
    let echo_addr = spawn_echo_server().await;

    let stream = bridge
        .client
        .create_stream("127.0.0.1", echo_addr.port())
        .expect("stream created");

    assert!(
        wait_until(|| stream.state() == StreamState::Open, Duration::from_secs(5)).await,
        "handshake did not complete"
    );
    assert_eq!(bridge.gateway.stream_count(), 1);

    let message = b"ping through the mesh";
    assert_eq!(stream.send(message), message.len());

    let echoed = recv_exact(&stream, message.len(), Duration::from_secs(5)).await;
    assert_eq!(&echoed[..], message);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bulk_data_survives_chunking() {
    let bridge = start_bridge(eager_config());
    let echo_addr = spawn_echo_server().await;

    let stream = bridge
        .client
        .create_stream("127.0.0.1", echo_addr.port())
        .expect("stream created");
    assert!(wait_until(|| stream.state() == StreamState::Open, Duration::from_secs(5)).await);

    // Several windows' worth of data, so flow control and ACK pacing are
    // both exercised.
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 241) as u8).collect();
    assert_eq!(stream.send(&payload), payload.len());

    let echoed = recv_exact(&stream, payload.len(), Duration::from_secs(20)).await;
    assert_eq!(echoed, payload);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connection_resets_stream() {
    let bridge = start_bridge(eager_config());

    // Grab a port with no listener behind it.
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let stream = bridge
        .client
        .create_stream("127.0.0.1", dead_port)
        .expect("SYN should go out");

    // Gateway answers with RST ("Connection failed"); the client closes
    // and reaps the stream.
    assert!(
        wait_until(|| stream.state() == StreamState::Closed, Duration::from_secs(5)).await,
        "stream should be reset"
    );
    assert_eq!(bridge.client.stream_count(), 0);
    assert_eq!(bridge.gateway.stream_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_close_propagates_fin() {
    let bridge = start_bridge(eager_config());

    // Server that hangs up as soon as the connection is established.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });

    let stream = bridge
        .client
        .create_stream("127.0.0.1", addr.port())
        .expect("stream created");

    // The gateway sees EOF, FINs the stream, and the client winds down.
    // (The FIN can arrive right on the heels of the SYN|ACK, so don't
    // insist on observing OPEN.)
    assert!(
        wait_until(
            || matches!(stream.state(), StreamState::FinRecv | StreamState::Closed),
            Duration::from_secs(5)
        )
        .await,
        "FIN should reach the client"
    );
    assert!(stream.recv(4096, Some(Duration::ZERO)).await.is_empty());
    assert!(
        wait_until(|| bridge.client.stream_count() == 0, Duration::from_secs(5)).await,
        "client manager should reap the stream"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupt_datagrams_are_counted_and_dropped() {
    let bridge = start_bridge(eager_config());

    // Too short to be a frame.
    bridge.client.handle_frame(GATEWAY_NODE, b"garbage");
    // Right length, wrong CRC.
    bridge.gateway.handle_frame(CLIENT_NODE, &[0u8; 25]).await;

    assert_eq!(bridge.client.decode_errors(), 1);
    assert_eq!(bridge.gateway.decode_errors(), 1);
    assert_eq!(bridge.client.stream_count(), 0);
    assert_eq!(bridge.gateway.stream_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_connect_target_is_rejected_locally() {
    let bridge = start_bridge(eager_config());
    assert!(bridge.client.create_stream("", 80).is_none());
    assert!(bridge.client.create_stream("example.com", 0).is_none());
    assert_eq!(bridge.client.stream_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_tunnels_are_isolated() {
    let bridge = start_bridge(eager_config());
    let echo_addr = spawn_echo_server().await;

    let first = bridge
        .client
        .create_stream("127.0.0.1", echo_addr.port())
        .unwrap();
    let second = bridge
        .client
        .create_stream("127.0.0.1", echo_addr.port())
        .unwrap();
    assert_ne!(first.stream_id(), second.stream_id());

    assert!(wait_until(|| first.state() == StreamState::Open, Duration::from_secs(5)).await);
    assert!(wait_until(|| second.state() == StreamState::Open, Duration::from_secs(5)).await);

    first.send(b"alpha");
    second.send(b"beta");

    let from_first = recv_exact(&first, 5, Duration::from_secs(5)).await;
    let from_second = recv_exact(&second, 4, Duration::from_secs(5)).await;
    assert_eq!(&from_first[..], b"alpha");
    assert_eq!(&from_second[..], b"beta");
}
