//! ACK/NACK emission policies.
//!
//! A policy decides which control frames go out in response to sends,
//! in-order deliveries, detected gaps, and received control frames. The two
//! shipped policies are interchangeable on the wire — a peer only notices
//! the difference in control-frame volume.

mod basic;
mod smart;

pub use basic::BasicAckNack;
pub use smart::SmartAckNack;

use crate::config::{AckMethod, Config};
use crate::frame::Frame;
use crate::stream::Stream;

/// Hooks a stream invokes around its send and receive paths.
///
/// Implementations keep their own pacing state; everything observable about
/// the stream (window, state, stats) is reached through the `stream`
/// argument. Returned frames are transmitted by the caller in order.
pub trait AckPolicy: Send {
    /// Invoked before a payload frame is sent; returns control frames to
    /// send ahead of it.
    fn on_send(&mut self, _stream: &Stream, _frame: &Frame) -> Vec<Frame> {
        Vec::new()
    }

    /// Invoked after a batch of payload frames went out.
    fn on_chunks_sent(&mut self, _stream: &Stream) -> Vec<Frame> {
        Vec::new()
    }

    /// Process the ACK/NACK information carried by a received frame.
    fn handle_control(&mut self, stream: &Stream, frame: &Frame) -> Vec<Frame>;

    /// Invoked when the receive side detects missing sequence numbers.
    fn on_missing(&mut self, stream: &Stream, missing_seqs: &[u32]) -> Vec<Frame>;

    /// Invoked after in-order payload (plus any newly contiguous buffered
    /// frames) was delivered to the receive buffer.
    fn on_complete(&mut self, stream: &Stream) -> Vec<Frame>;
}

/// Build the policy selected by the configuration.
pub fn from_config(config: &Config) -> Box<dyn AckPolicy> {
    match config.ack_method {
        AckMethod::Basic => Box::new(BasicAckNack::new()),
        AckMethod::Smart => Box::new(SmartAckNack::new(
            config.ack_every_n,
            config.ack_interval(),
            config.nack_interval(),
        )),
    }
}
