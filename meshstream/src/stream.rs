//! Per-stream state machine and byte-oriented send/recv API.
//!
//! A stream owns one sliding window and one ACK/NACK policy instance. The
//! policy is fixed at construction; swapping it mid-stream would change the
//! control-frame cadence the remote side calibrated against.
//!
//! All methods take `&self`; internal state is lock-protected so a stream
//! can be shared between the manager's dispatch path and a socket pump.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::chunking::iter_chunks;
use crate::config::Config;
use crate::frame::{Frame, FrameFlags};
use crate::policy::{self, AckPolicy};
use crate::transport::DatagramSender;
use crate::window::{PendingFrame, SlidingWindow};

/// Stream lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Initial and terminal state.
    Closed,
    /// SYN sent, waiting for the peer's acknowledgment.
    SynSent,
    /// SYN received, SYN|ACK being sent.
    SynRecv,
    /// Stream established.
    Open,
    /// FIN sent, waiting for the peer to confirm.
    FinSent,
    /// FIN received; the local consumer may still drain buffered bytes.
    FinRecv,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Closed => write!(f, "CLOSED"),
            StreamState::SynSent => write!(f, "SYN_SENT"),
            StreamState::SynRecv => write!(f, "SYN_RECV"),
            StreamState::Open => write!(f, "OPEN"),
            StreamState::FinSent => write!(f, "FIN_SENT"),
            StreamState::FinRecv => write!(f, "FIN_RECV"),
        }
    }
}

/// Counters for one stream. All fields are monotonic; RTT figures cover
/// frames removed from the window by a cumulative ACK.
#[derive(Debug, Default)]
pub struct StreamStats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    retransmits: AtomicU64,
    rtt_count: AtomicU64,
    rtt_sum_us: AtomicU64,
    rtt_max_us: AtomicU64,
    max_pending: AtomicU64,
}

impl StreamStats {
    pub fn add_retransmit(&self) {
        self.retransmits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record round-trip samples for frames just removed from the window.
    /// Clock coarseness can make `now` precede `send_time`; samples clamp
    /// to zero.
    pub fn record_rtts(&self, acked: &[PendingFrame]) {
        let now = Instant::now();
        for pending in acked {
            let rtt_us = now.saturating_duration_since(pending.send_time).as_micros() as u64;
            self.rtt_count.fetch_add(1, Ordering::Relaxed);
            self.rtt_sum_us.fetch_add(rtt_us, Ordering::Relaxed);
            self.rtt_max_us.fetch_max(rtt_us, Ordering::Relaxed);
        }
    }

    fn note_pending(&self, pending: usize) {
        self.max_pending.fetch_max(pending as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let rtt_count = self.rtt_count.load(Ordering::Relaxed);
        let rtt_sum_us = self.rtt_sum_us.load(Ordering::Relaxed);
        StatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            retransmits: self.retransmits.load(Ordering::Relaxed),
            rtt_count,
            rtt_avg_ms: if rtt_count == 0 {
                0.0
            } else {
                rtt_sum_us as f64 / rtt_count as f64 / 1000.0
            },
            rtt_max_ms: self.rtt_max_us.load(Ordering::Relaxed) as f64 / 1000.0,
            max_pending: self.max_pending.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a stream's counters.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub retransmits: u64,
    pub rtt_count: u64,
    pub rtt_avg_ms: f64,
    pub rtt_max_ms: f64,
    pub max_pending: u64,
}

/// A reliable, ordered, bidirectional byte stream between two mesh nodes.
pub struct Stream {
    stream_id: u32,
    remote_node_id: u32,
    config: Arc<Config>,
    sender: Arc<dyn DatagramSender>,
    state: Mutex<StreamState>,
    window: SlidingWindow,
    policy: Mutex<Box<dyn AckPolicy>>,
    /// In-order bytes ready for the consumer.
    recv_buf: Mutex<BytesMut>,
    recv_notify: Notify,
    /// Chunks waiting for window space.
    send_queue: Mutex<VecDeque<Bytes>>,
    last_activity: Mutex<Instant>,
    stats: StreamStats,
}

impl Stream {
    /// Create a stream with the policy selected by the configuration.
    pub fn new(
        stream_id: u32,
        remote_node_id: u32,
        config: Arc<Config>,
        sender: Arc<dyn DatagramSender>,
    ) -> Self {
        let policy = policy::from_config(&config);
        Self::with_policy(stream_id, remote_node_id, config, sender, policy)
    }

    pub fn with_policy(
        stream_id: u32,
        remote_node_id: u32,
        config: Arc<Config>,
        sender: Arc<dyn DatagramSender>,
        policy: Box<dyn AckPolicy>,
    ) -> Self {
        let window = SlidingWindow::new(config.window_size);
        Self {
            stream_id,
            remote_node_id,
            config,
            sender,
            state: Mutex::new(StreamState::Closed),
            window,
            policy: Mutex::new(policy),
            recv_buf: Mutex::new(BytesMut::new()),
            recv_notify: Notify::new(),
            send_queue: Mutex::new(VecDeque::new()),
            last_activity: Mutex::new(Instant::now()),
            stats: StreamStats::default(),
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn remote_node_id(&self) -> u32 {
        self.remote_node_id
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub(crate) fn set_state(&self, new: StreamState) {
        let old = {
            let mut state = self.state.lock();
            let old = *state;
            if old == new {
                return;
            }
            *state = new;
            old
        };
        tracing::debug!(stream_id = self.stream_id, from = %old, to = %new, "stream state");
        if matches!(new, StreamState::Closed | StreamState::FinRecv) {
            // Wake a blocked recv() so it observes the closure.
            self.recv_notify.notify_one();
        }
    }

    /// Encode and transmit one frame. On success the frame counts toward the
    /// stream's traffic stats and refreshes the activity timestamp. A `false`
    /// return means the radio refused the datagram; window state is not
    /// touched here, so the caller may retry.
    fn send_frame(&self, frame: &Frame) -> bool {
        let encoded = match frame.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(stream_id = self.stream_id, %frame, "encode failed: {e}");
                return false;
            }
        };

        if !self.sender.send_datagram(self.remote_node_id, &encoded) {
            return false;
        }

        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_sent
            .fetch_add(frame.payload.len() as u64, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
        tracing::trace!(stream_id = self.stream_id, %frame, "sent");
        true
    }

    fn update_max_pending(&self) {
        self.stats.note_pending(self.window.pending_count());
    }

    /// Initiate the stream (client side) by sending a SYN.
    ///
    /// The SYN may carry an initial payload — the bridge puts the
    /// `CONNECT host:port` request line there. Only valid from CLOSED;
    /// returns whether the SYN went out.
    pub fn open(&self, payload: Bytes) -> bool {
        {
            let state = self.state();
            if state != StreamState::Closed {
                tracing::warn!(stream_id = self.stream_id, state = %state, "cannot open");
                return false;
            }
        }

        let frame = Frame::data(
            self.stream_id,
            self.window.allocate_seq(),
            self.window.next_expected_seq(),
            FrameFlags::SYN,
            payload,
        );

        if !self.send_frame(&frame) {
            return false;
        }
        self.window.mark_sent(frame);
        self.update_max_pending();
        self.set_state(StreamState::SynSent);
        tracing::info!(stream_id = self.stream_id, "SYN sent");
        true
    }

    /// Accept an incoming stream (gateway side) by sending SYN|ACK.
    ///
    /// The peer's SYN must already have been fed through
    /// [`receive_frame`](Self::receive_frame) so the window acknowledges its
    /// seq. Reverts to CLOSED if the SYN|ACK send fails, keeping local state
    /// consistent with what the peer saw.
    pub fn accept(&self) -> bool {
        if self.state() != StreamState::Closed {
            return false;
        }
        self.set_state(StreamState::SynRecv);

        let frame = Frame::control(
            self.stream_id,
            self.window.allocate_seq(),
            self.window.next_expected_seq(),
            FrameFlags::SYN | FrameFlags::ACK,
        );

        if self.send_frame(&frame) {
            self.window.mark_sent(frame);
            self.update_max_pending();
            self.set_state(StreamState::Open);
            tracing::info!(stream_id = self.stream_id, "accepted");
            true
        } else {
            tracing::warn!(
                stream_id = self.stream_id,
                "failed to send SYN-ACK, reverting to CLOSED"
            );
            self.set_state(StreamState::Closed);
            false
        }
    }

    /// Queue bytes for transmission.
    ///
    /// The data is chunked to the configured payload size and drained into
    /// the window as space allows; chunks beyond the window wait in the send
    /// queue. Valid in OPEN and SYN_SENT (zero-RTT queueing). Returns the
    /// number of bytes queued — not necessarily yet transmitted.
    pub fn send(&self, data: &[u8]) -> usize {
        let state = self.state();
        if !matches!(state, StreamState::Open | StreamState::SynSent) {
            tracing::warn!(stream_id = self.stream_id, state = %state, "cannot send");
            return 0;
        }

        let data = Bytes::copy_from_slice(data);
        {
            let mut queue = self.send_queue.lock();
            for chunk in iter_chunks(&data, self.config.chunk_size()) {
                queue.push_back(chunk);
            }
        }

        self.process_send_queue();
        data.len()
    }

    /// Drain queued chunks into the window while it has room.
    ///
    /// A chunk whose radio send fails goes back to the front of the queue so
    /// byte order is preserved for the next attempt.
    fn process_send_queue(&self) -> usize {
        let mut sent = 0;
        let mut queue = self.send_queue.lock();

        while self.window.can_send() {
            let Some(chunk) = queue.pop_front() else {
                break;
            };

            let frame = Frame::data(
                self.stream_id,
                self.window.allocate_seq(),
                self.window.next_expected_seq(),
                FrameFlags::ACK,
                chunk.clone(),
            );

            for control in self.policy.lock().on_send(self, &frame) {
                self.send_frame(&control);
            }

            if self.send_frame(&frame) {
                self.window.mark_sent(frame);
                self.update_max_pending();
                sent += 1;
            } else {
                queue.push_front(chunk);
                break;
            }
        }

        if sent > 0 {
            for control in self.policy.lock().on_chunks_sent(self) {
                self.send_frame(&control);
            }
        }
        sent
    }

    /// Inject one demultiplexed frame from the manager.
    ///
    /// This is the single inbound entry point; the manager guarantees it is
    /// never called concurrently for the same stream.
    pub fn receive_frame(&self, frame: &Frame) {
        *self.last_activity.lock() = Instant::now();
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(stream_id = self.stream_id, %frame, "received");

        let controls = self.policy.lock().handle_control(self, frame);
        for control in &controls {
            self.send_frame(control);
        }

        if frame.is_syn() {
            // Register the peer's initial seq so our next ack covers it.
            // Any SYN payload (the CONNECT request) is the manager's to
            // interpret, not stream data.
            self.window.receive_frame(frame);
            return;
        }

        if frame.is_rst() {
            self.window.clear();
            self.send_queue.lock().clear();
            self.set_state(StreamState::Closed);
            tracing::info!(stream_id = self.stream_id, "RST received");
            return;
        }

        if frame.is_fin() {
            let ack = Frame::control(
                self.stream_id,
                self.window.allocate_seq(),
                frame.seq.wrapping_add(1),
                FrameFlags::ACK,
            );
            self.send_frame(&ack);
            let next = if self.state() == StreamState::FinSent {
                // Simultaneous close.
                StreamState::Closed
            } else {
                StreamState::FinRecv
            };
            self.set_state(next);
            tracing::info!(stream_id = self.stream_id, "FIN received");
            return;
        }

        if self.state() == StreamState::FinSent
            && frame.is_ack()
            && self.window.pending_count() == 0
        {
            // The cumulative ack covered our FIN.
            self.set_state(StreamState::Closed);
        }

        if !frame.payload.is_empty() {
            if let Some(delivered) = self.window.receive_frame(frame) {
                {
                    // Append the in-order payload and drain newly contiguous
                    // buffered frames under one recv_buf lock so readers see
                    // a consistent prefix.
                    let mut buf = self.recv_buf.lock();
                    buf.extend_from_slice(&delivered.payload);
                    self.stats
                        .bytes_received
                        .fetch_add(delivered.payload.len() as u64, Ordering::Relaxed);
                    for buffered in self.window.get_deliverable_frames() {
                        buf.extend_from_slice(&buffered.payload);
                        self.stats
                            .bytes_received
                            .fetch_add(buffered.payload.len() as u64, Ordering::Relaxed);
                    }
                }
                self.recv_notify.notify_one();

                let controls = self.policy.lock().on_complete(self);
                for control in &controls {
                    self.send_frame(control);
                }
            } else {
                let missing = self.window.get_missing_seqs();
                if !missing.is_empty() {
                    let controls = self.policy.lock().on_missing(self, &missing);
                    for control in &controls {
                        self.send_frame(control);
                    }
                }
            }
        }

        // Acks in this frame may have opened window slack.
        self.process_send_queue();
    }

    /// Receive up to `max_bytes` from the stream.
    ///
    /// Blocks until data arrives, the deadline passes, or the stream closes;
    /// returns an empty buffer on timeout or closure. `Some(Duration::ZERO)`
    /// drains whatever is buffered without waiting.
    pub async fn recv(&self, max_bytes: usize, timeout: Option<Duration>) -> Bytes {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            {
                let mut buf = self.recv_buf.lock();
                if !buf.is_empty() {
                    let n = buf.len().min(max_bytes);
                    return buf.split_to(n).freeze();
                }
            }

            if matches!(self.state(), StreamState::Closed | StreamState::FinRecv) {
                return Bytes::new();
            }

            match deadline {
                None => self.recv_notify.notified().await,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Bytes::new();
                    }
                    let _ = tokio::time::timeout(deadline - now, self.recv_notify.notified())
                        .await;
                }
            }
        }
    }

    /// Close the stream gracefully by sending FIN.
    pub fn close(&self) {
        if matches!(self.state(), StreamState::Closed | StreamState::FinSent) {
            return;
        }

        let frame = Frame::control(
            self.stream_id,
            self.window.allocate_seq(),
            self.window.next_expected_seq(),
            FrameFlags::FIN | FrameFlags::ACK,
        );

        if self.send_frame(&frame) {
            self.window.mark_sent(frame);
            self.update_max_pending();
            self.set_state(StreamState::FinSent);
            tracing::info!(stream_id = self.stream_id, "FIN sent");
        }
    }

    /// Abort the stream: best-effort RST, then drop all transport state.
    ///
    /// The RST carries seq=ack=0; the peer treats RST as unconditional
    /// closure and never reasons about its sequence fields.
    pub fn reset(&self) {
        let frame = Frame::control(self.stream_id, 0, 0, FrameFlags::RST);
        self.send_frame(&frame);
        self.window.clear();
        self.send_queue.lock().clear();
        self.set_state(StreamState::Closed);
        tracing::info!(stream_id = self.stream_id, "RST sent");
    }

    /// Drop the stream without notifying the peer. Used when retransmits are
    /// exhausted — the link is already saturated with the failed retries.
    pub fn abandon(&self) {
        self.window.clear();
        self.send_queue.lock().clear();
        self.set_state(StreamState::Closed);
    }

    /// Run the retransmit sweep. Returns `false` iff some frame exceeded the
    /// retry cap, in which case the caller must abandon the stream.
    pub fn check_retransmits(&self) -> bool {
        let (to_retransmit, exceeded) = self.window.get_pending_for_retransmit(
            self.config.retransmit_timeout(),
            self.config.max_retransmits,
        );

        for frame in &to_retransmit {
            self.send_frame(frame);
            self.stats.add_retransmit();
        }

        if !exceeded.is_empty() {
            tracing::warn!(
                stream_id = self.stream_id,
                count = exceeded.len(),
                "frames exceeded max retransmits"
            );
            return false;
        }
        true
    }

    /// Whether the inactivity timeout has elapsed.
    pub fn is_timed_out(&self) -> bool {
        self.last_activity.lock().elapsed() > self.config.stream_timeout()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("stream_id", &self.stream_id)
            .field("remote_node_id", &self.remote_node_id)
            .field("state", &self.state())
            .finish()
    }
}
