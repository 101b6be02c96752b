//! Shared helpers for the integration suites.
#![allow(dead_code)] // not every suite uses every helper

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meshstream::frame::Frame;
use meshstream::transport::DatagramSender;
use parking_lot::Mutex;

/// Captures every outbound datagram; can be told to refuse sends.
pub struct CaptureSender {
    sent: Mutex<Vec<(u32, Vec<u8>)>>,
    accept: AtomicBool,
}

impl CaptureSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            accept: AtomicBool::new(true),
        })
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::Relaxed);
    }

    /// Decode everything sent so far.
    pub fn frames(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .iter()
            .map(|(_, raw)| Frame::decode(raw).expect("captured frame decodes"))
            .collect()
    }

    /// Decode and clear the capture buffer.
    pub fn take_frames(&self) -> Vec<Frame> {
        let raw = std::mem::take(&mut *self.sent.lock());
        raw.iter()
            .map(|(_, raw)| Frame::decode(raw).expect("captured frame decodes"))
            .collect()
    }
}

impl DatagramSender for CaptureSender {
    fn send_datagram(&self, dest_node_id: u32, data: &[u8]) -> bool {
        if !self.accept.load(Ordering::Relaxed) {
            return false;
        }
        self.sent.lock().push((dest_node_id, data.to_vec()));
        true
    }
}
