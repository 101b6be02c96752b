//! Baseline policy: one ACK per delivery, one NACK per observed gap.

use crate::frame::{Frame, FrameFlags};
use crate::policy::AckPolicy;
use crate::stream::{Stream, StreamState};

/// ACK on in-order delivery; NACK the first missing sequence on gaps.
#[derive(Debug, Default)]
pub struct BasicAckNack;

impl BasicAckNack {
    pub fn new() -> Self {
        Self
    }
}

impl AckPolicy for BasicAckNack {
    fn handle_control(&mut self, stream: &Stream, frame: &Frame) -> Vec<Frame> {
        let mut out = Vec::new();

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
        let Some(&first) = missing_seqs.first() else {
            return Vec::new();
        };
        vec![Frame::control(
            stream.stream_id(),
            stream.window().allocate_seq(),
            first,
            FrameFlags::NACK,
        )]
    }

    fn on_complete(&mut self, stream: &Stream) -> Vec<Frame> {
        vec![Frame::control(
            stream.stream_id(),
            stream.window().allocate_seq(),
            stream.window().next_expected_seq(),
            FrameFlags::ACK,
        )]
    }
}
