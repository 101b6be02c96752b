//! Default policy: coalesced ACKs, debounced NACKs, and explicit SYN|ACK
//! handshake handling.
//!
//! On a link this slow every control frame competes with payload for
//! airtime, so ACKs ride a counter-or-deadline schedule and identical NACKs
//! are suppressed within a refractory interval.

use std::time::{Duration, Instant};

use crate::frame::{Frame, FrameFlags};
use crate::policy::AckPolicy;
use crate::stream::{Stream, StreamState};

/// ACK every N deliveries or after an interval; NACK with debounce.
#[derive(Debug)]
pub struct SmartAckNack {
    ack_every_n: u32,
    ack_interval: Duration,
    nack_interval: Duration,
    pending_acks: u32,
    last_ack_time: Option<Instant>,
    last_nack_time: Option<Instant>,
    last_nack_seq: Option<u32>,
}

impl SmartAckNack {
    pub fn new(ack_every_n: u32, ack_interval: Duration, nack_interval: Duration) -> Self {
        Self {
            ack_every_n: ack_every_n.max(1),
            ack_interval,
            nack_interval,
            pending_acks: 0,
            last_ack_time: None,
            last_nack_time: None,
            last_nack_seq: None,
        }
    }

    fn cumulative_ack(&self, stream: &Stream) -> Frame {
        Frame::control(
            stream.stream_id(),
            stream.window().allocate_seq(),
            stream.window().next_expected_seq(),
            FrameFlags::ACK,
        )
    }
}

impl AckPolicy for SmartAckNack {
    fn handle_control(&mut self, stream: &Stream, frame: &Frame) -> Vec<Frame> {
        let mut out = Vec::new();

        if frame.is_syn() && frame.is_ack() {
            // SYN|ACK handshake reply: accept the peer's initial seq,
            // confirm our SYN, and answer with a pure ACK so the peer's
            // window opens without waiting for payload.
            if stream.state() == StreamState::SynSent {
                stream.window().receive_frame(frame);
                let acked = stream.window().process_ack(frame.ack);
                stream.stats().record_rtts(&acked);
                stream.set_state(StreamState::Open);
                out.push(self.cumulative_ack(stream));
            }
            return out;
        }

        if frame.is_ack() {
            let acked = stream.window().process_ack(frame.ack);
            if !acked.is_empty() {
                stream.stats().record_rtts(&acked);
                if stream.state() == StreamState::SynSent {
                    stream.set_state(StreamState::Open);
                }
            }
        }

        if frame.is_nack() {
            if let Some(retransmit) = stream.window().process_nack(frame.ack) {
                stream.stats().add_retransmit();
                out.push(retransmit);
            }
        }

        out
    }

    fn on_missing(&mut self, stream: &Stream, missing_seqs: &[u32]) -> Vec<Frame> {
        let Some(&seq) = missing_seqs.first() else {
            return Vec::new();
        };

        let now = Instant::now();
        if self.last_nack_seq == Some(seq) {
            if let Some(last) = self.last_nack_time {
                if now.duration_since(last) < self.nack_interval {
                    return Vec::new();
                }
            }
        }

        self.last_nack_seq = Some(seq);
        self.last_nack_time = Some(now);
        vec![Frame::control(
            stream.stream_id(),
            stream.window().allocate_seq(),
            seq,
            FrameFlags::NACK,
        )]
    }

    fn on_complete(&mut self, stream: &Stream) -> Vec<Frame> {
        self.pending_acks += 1;
        let now = Instant::now();

        let count_due = self.pending_acks >= self.ack_every_n;
        let interval_due = match self.last_ack_time {
            Some(last) => now.duration_since(last) >= self.ack_interval,
            None => true,
        };
        if !count_due && !interval_due {
            return Vec::new();
        }

        self.pending_acks = 0;
        self.last_ack_time = Some(now);
        vec![self.cumulative_ack(stream)]
    }
}
