//! ACK/NACK policy behavior, driven through the stream's receive path.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::CaptureSender;
use meshstream::config::{AckMethod, Config};
use meshstream::frame::{Frame, FrameFlags};
use meshstream::stream::{Stream, StreamState};

const STREAM_ID: u32 = 0x42;
const NODE_ID: u32 = 0xA1B2;

fn smart_config(ack_every_n: u32, ack_interval_ms: u64, nack_interval_ms: u64) -> Arc<Config> {
    Arc::new(Config {
        ack_method: AckMethod::Smart,
        ack_every_n,
        ack_interval_ms,
        nack_interval_ms,
        ..Config::default()
    })
}

fn basic_config() -> Arc<Config> {
    Arc::new(Config {
        ack_method: AckMethod::Basic,
        ..Config::default()
    })
}

fn payload_frame(seq: u32, ack: u32, payload: &'static [u8]) -> Frame {
    Frame::data(STREAM_ID, seq, ack, FrameFlags::ACK, Bytes::from_static(payload))
}

// ---------------------------------------------------------------------------
// Basic policy
// ---------------------------------------------------------------------------

#[test]
fn basic_ack_in_syn_sent_opens_stream() {
    let sender = CaptureSender::new();
    let stream = Stream::new(STREAM_ID, NODE_ID, basic_config(), sender.clone());

    assert!(stream.open(Bytes::new()));
    assert_eq!(stream.state(), StreamState::SynSent);
    sender.take_frames();

    // SYN|ACK from the peer acknowledges our SYN.
    let syn_ack = Frame::control(STREAM_ID, 0, 1, FrameFlags::SYN | FrameFlags::ACK);
    stream.receive_frame(&syn_ack);
    assert_eq!(stream.state(), StreamState::Open);
    assert_eq!(stream.window().pending_count(), 0);
    assert_eq!(stream.window().next_expected_seq(), 1);
}

#[test]
fn basic_acks_every_delivery() {
    let sender = CaptureSender::new();
    let stream = Stream::new(STREAM_ID, NODE_ID, basic_config(), sender.clone());
    stream.open(Bytes::new());
    stream.receive_frame(&Frame::control(STREAM_ID, 0, 1, FrameFlags::SYN | FrameFlags::ACK));
    sender.take_frames();

    for seq in 1..=3 {
        stream.receive_frame(&payload_frame(seq, 1, b"chunk"));
    }

    let acks: Vec<_> = sender.frames().into_iter().filter(|f| f.is_ack()).collect();
    assert_eq!(acks.len(), 3);
    assert_eq!(acks.last().unwrap().ack, 4);
}

#[test]
fn basic_nack_triggers_single_retransmit() {
    let sender = CaptureSender::new();
    let stream = Stream::new(STREAM_ID, NODE_ID, basic_config(), sender.clone());
    stream.open(Bytes::new());
    stream.receive_frame(&Frame::control(STREAM_ID, 0, 1, FrameFlags::SYN | FrameFlags::ACK));
    stream.send(b"hello");
    sender.take_frames();

    // Peer NACKs the payload frame (seq 1).
    let nack = Frame::control(STREAM_ID, 1, 1, FrameFlags::NACK);
    stream.receive_frame(&nack);

    let frames = sender.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].seq, 1);
    assert_eq!(&frames[0].payload[..], b"hello");
    assert_eq!(stream.stats().snapshot().retransmits, 1);
}

#[test]
fn basic_nack_for_acked_seq_is_noop() {
    let sender = CaptureSender::new();
    let stream = Stream::new(STREAM_ID, NODE_ID, basic_config(), sender.clone());
    stream.open(Bytes::new());
    stream.receive_frame(&Frame::control(STREAM_ID, 0, 1, FrameFlags::SYN | FrameFlags::ACK));
    stream.send(b"hello");
    // Peer acks the payload (seq 1).
    stream.receive_frame(&Frame::control(STREAM_ID, 1, 2, FrameFlags::ACK));
    sender.take_frames();

    let nack = Frame::control(STREAM_ID, 1, 1, FrameFlags::NACK);
    stream.receive_frame(&nack);
    assert!(sender.frames().is_empty());
}

#[test]
fn basic_gap_emits_nack_for_first_missing() {
    let sender = CaptureSender::new();
    let stream = Stream::new(STREAM_ID, NODE_ID, basic_config(), sender.clone());
    stream.open(Bytes::new());
    stream.receive_frame(&Frame::control(STREAM_ID, 0, 1, FrameFlags::SYN | FrameFlags::ACK));
    sender.take_frames();

    // seq 1 delivered, then seq 3 leaves a gap at 2.
    stream.receive_frame(&payload_frame(1, 1, b"A"));
    sender.take_frames();
    stream.receive_frame(&payload_frame(3, 1, b"C"));

    let nacks: Vec<_> = sender.frames().into_iter().filter(|f| f.is_nack()).collect();
    assert_eq!(nacks.len(), 1);
    assert_eq!(nacks[0].ack, 2);
}

// ---------------------------------------------------------------------------
// Smart policy
// ---------------------------------------------------------------------------

#[test]
fn smart_syn_ack_handshake_emits_pure_ack() {
    let sender = CaptureSender::new();
    let stream = Stream::new(STREAM_ID, NODE_ID, smart_config(4, 60_000, 60_000), sender.clone());

    assert!(stream.open(Bytes::from_static(b"CONNECT example.com:443")));
    sender.take_frames();

    let syn_ack = Frame::control(STREAM_ID, 0, 1, FrameFlags::SYN | FrameFlags::ACK);
    stream.receive_frame(&syn_ack);

    assert_eq!(stream.state(), StreamState::Open);
    // Our SYN left the window and the peer's initial seq was consumed.
    assert_eq!(stream.window().pending_count(), 0);
    assert_eq!(stream.window().next_expected_seq(), 1);

    let frames = sender.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].flags, FrameFlags::ACK);
    assert_eq!(frames[0].seq, 1);
    assert_eq!(frames[0].ack, 1);
}

#[test]
fn smart_coalesces_acks_by_count() {
    let sender = CaptureSender::new();
    // Long intervals so only the counter can trigger ACKs.
    let stream = Stream::new(STREAM_ID, NODE_ID, smart_config(4, 60_000, 60_000), sender.clone());
    stream.open(Bytes::new());
    stream.receive_frame(&Frame::control(STREAM_ID, 0, 1, FrameFlags::SYN | FrameFlags::ACK));
    sender.take_frames();

    // First delivery acks immediately (no ACK sent yet on this stream),
    // then the counter gates: next ACK after four more deliveries.
    for seq in 1..=5 {
        stream.receive_frame(&payload_frame(seq, 1, b"x"));
    }

    let acks: Vec<_> = sender.frames().into_iter().filter(|f| f.is_ack()).collect();
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[0].ack, 2);
    assert_eq!(acks[1].ack, 6);
}

#[test]
fn smart_debounces_repeated_nacks() {
    let sender = CaptureSender::new();
    let stream = Stream::new(STREAM_ID, NODE_ID, smart_config(4, 60_000, 60_000), sender.clone());
    stream.open(Bytes::new());
    stream.receive_frame(&Frame::control(STREAM_ID, 0, 1, FrameFlags::SYN | FrameFlags::ACK));
    stream.receive_frame(&payload_frame(1, 1, b"A"));
    sender.take_frames();

    // Two out-of-order arrivals point at the same hole; only one NACK goes out.
    stream.receive_frame(&payload_frame(3, 1, b"C"));
    stream.receive_frame(&payload_frame(4, 1, b"D"));

    let nacks: Vec<_> = sender.frames().into_iter().filter(|f| f.is_nack()).collect();
    assert_eq!(nacks.len(), 1);
    assert_eq!(nacks[0].ack, 2);
}

#[test]
fn smart_nack_reemitted_after_interval() {
    let sender = CaptureSender::new();
    // Zero debounce interval: every gap observation may NACK.
    let stream = Stream::new(STREAM_ID, NODE_ID, smart_config(4, 60_000, 0), sender.clone());
    stream.open(Bytes::new());
    stream.receive_frame(&Frame::control(STREAM_ID, 0, 1, FrameFlags::SYN | FrameFlags::ACK));
    stream.receive_frame(&payload_frame(1, 1, b"A"));
    sender.take_frames();

    stream.receive_frame(&payload_frame(3, 1, b"C"));
    stream.receive_frame(&payload_frame(4, 1, b"D"));

    let nacks: Vec<_> = sender.frames().into_iter().filter(|f| f.is_nack()).collect();
    assert_eq!(nacks.len(), 2);
}

#[test]
fn reordered_delivery_drains_in_order_and_acks_high_water() {
    let sender = CaptureSender::new();
    // ack_every_n=1 so the drain is acknowledged immediately.
    let stream = Stream::new(STREAM_ID, NODE_ID, smart_config(1, 60_000, 60_000), sender.clone());
    stream.open(Bytes::new());
    stream.receive_frame(&Frame::control(STREAM_ID, 0, 1, FrameFlags::SYN | FrameFlags::ACK));
    sender.take_frames();

    // Peer seqs 1..=4 arrive as 1, 3, 4, 2.
    stream.receive_frame(&payload_frame(1, 1, b"A"));
    stream.receive_frame(&payload_frame(3, 1, b"C"));
    stream.receive_frame(&payload_frame(4, 1, b"D"));
    stream.receive_frame(&payload_frame(2, 1, b"B"));

    let buffered = tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(stream.recv(64, Some(Duration::ZERO)));
    assert_eq!(&buffered[..], b"ABCD");

    let last_ack = sender
        .frames()
        .into_iter()
        .filter(|f| f.is_ack())
        .next_back()
        .unwrap();
    assert_eq!(last_ack.ack, 5);
}
