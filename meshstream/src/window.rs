//! Per-stream sliding window bookkeeping.
//!
//! Send side: a bounded table of pending (unacknowledged) frames plus the
//! sequence allocator. Receive side: the next expected sequence and a buffer
//! for out-of-order arrivals. All state sits behind one mutex so every
//! operation observes and mutates it atomically.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::frame::Frame;

/// A sent frame still awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub frame: Frame,
    pub send_time: Instant,
    pub retransmit_count: u32,
}

#[derive(Debug)]
struct Inner {
    /// Next sequence number to hand out.
    next_seq: u32,
    /// Pending frames keyed by seq. Sequence numbers are allocated
    /// monotonically, so map order matches send order.
    pending: BTreeMap<u32, PendingFrame>,
    /// Next sequence the receive side will deliver.
    next_expected_seq: u32,
    /// Out-of-order arrivals waiting for the gap to fill.
    recv_buffer: BTreeMap<u32, Frame>,
}

/// Sliding window for one stream.
#[derive(Debug)]
pub struct SlidingWindow {
    window_size: usize,
    inner: Mutex<Inner>,
}

impl SlidingWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            inner: Mutex::new(Inner {
                next_seq: 0,
                pending: BTreeMap::new(),
                next_expected_seq: 0,
                recv_buffer: BTreeMap::new(),
            }),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn next_seq(&self) -> u32 {
        self.inner.lock().next_seq
    }

    /// The cumulative ACK value for the receive side.
    pub fn next_expected_seq(&self) -> u32 {
        self.inner.lock().next_expected_seq
    }

    /// Whether the window admits another in-flight frame.
    pub fn can_send(&self) -> bool {
        self.inner.lock().pending.len() < self.window_size
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Return the next sequence number without advancing it.
    ///
    /// Advancement happens in [`mark_sent`](Self::mark_sent), so a caller can
    /// build a frame, attempt the radio send, and only commit window state if
    /// the send went out.
    pub fn allocate_seq(&self) -> u32 {
        self.inner.lock().next_seq
    }

    /// Record a frame as sent and awaiting acknowledgment.
    pub fn mark_sent(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        inner.next_seq = frame.seq.wrapping_add(1);
        let seq = frame.seq;
        inner.pending.insert(
            seq,
            PendingFrame {
                frame,
                send_time: Instant::now(),
                retransmit_count: 0,
            },
        );
        tracing::debug!(
            seq,
            window = inner.pending.len(),
            window_size = self.window_size,
            "marked pending"
        );
    }

    /// Process a cumulative acknowledgment covering every seq below `ack_num`.
    ///
    /// Returns the acknowledged entries in seq order so the caller can record
    /// round-trip times against their send timestamps.
    pub fn process_ack(&self, ack_num: u32) -> Vec<PendingFrame> {
        let mut inner = self.inner.lock();
        let acked_seqs: Vec<u32> = inner
            .pending
            .keys()
            .copied()
            .filter(|seq| *seq < ack_num)
            .collect();

        let mut acked = Vec::with_capacity(acked_seqs.len());
        for seq in acked_seqs {
            if let Some(pending) = inner.pending.remove(&seq) {
                acked.push(pending);
            }
        }

        if !acked.is_empty() {
            tracing::debug!(
                ack = ack_num,
                acked = acked.len(),
                pending = inner.pending.len(),
                "processed cumulative ack"
            );
        }
        acked
    }

    /// Process a NACK requesting retransmission of one sequence.
    ///
    /// If the seq is still pending its retry counter is bumped, its timer
    /// reset, and the frame returned for immediate retransmission. NACKs for
    /// already-acked seqs are silent no-ops.
    pub fn process_nack(&self, nack_seq: u32) -> Option<Frame> {
        let mut inner = self.inner.lock();
        let pending = inner.pending.get_mut(&nack_seq)?;
        pending.retransmit_count += 1;
        pending.send_time = Instant::now();
        tracing::debug!(seq = nack_seq, "nack received, retransmitting");
        Some(pending.frame.clone())
    }

    /// Sweep pending frames whose age reached `timeout`.
    ///
    /// Frames still under the retry cap get their counter bumped and timer
    /// reset and are returned for retransmission; frames at the cap are left
    /// in place and their seqs reported so the caller can abandon the stream.
    pub fn get_pending_for_retransmit(
        &self,
        timeout: Duration,
        max_retransmits: u32,
    ) -> (Vec<Frame>, Vec<u32>) {
        let now = Instant::now();
        let mut to_retransmit = Vec::new();
        let mut exceeded_max = Vec::new();

        let mut inner = self.inner.lock();
        for (seq, pending) in inner.pending.iter_mut() {
            if now.saturating_duration_since(pending.send_time) < timeout {
                continue;
            }
            if pending.retransmit_count >= max_retransmits {
                tracing::warn!(seq, max_retransmits, "exceeded max retransmits");
                exceeded_max.push(*seq);
            } else {
                pending.retransmit_count += 1;
                pending.send_time = now;
                tracing::debug!(seq, attempt = pending.retransmit_count, "retransmitting");
                to_retransmit.push(pending.frame.clone());
            }
        }

        (to_retransmit, exceeded_max)
    }

    /// Process a received frame against the receive window.
    ///
    /// In-order frames advance `next_expected_seq` and are returned for
    /// delivery; stale duplicates return `None`; anything ahead of the
    /// expected seq is buffered.
    pub fn receive_frame(&self, frame: &Frame) -> Option<Frame> {
        let mut inner = self.inner.lock();
        let seq = frame.seq;

        if seq < inner.next_expected_seq {
            tracing::debug!(seq, expected = inner.next_expected_seq, "duplicate frame");
            return None;
        }

        if seq == inner.next_expected_seq {
            inner.next_expected_seq = seq.wrapping_add(1);
            tracing::trace!(seq, "received in-order frame");
            return Some(frame.clone());
        }

        tracing::debug!(
            seq,
            expected = inner.next_expected_seq,
            "buffered out-of-order frame"
        );
        inner.recv_buffer.insert(seq, frame.clone());
        None
    }

    /// Drain buffered frames that became contiguous after an in-order
    /// delivery, advancing `next_expected_seq` for each.
    pub fn get_deliverable_frames(&self) -> Vec<Frame> {
        let mut inner = self.inner.lock();
        let mut deliverable = Vec::new();

        loop {
            let next = inner.next_expected_seq;
            let Some(frame) = inner.recv_buffer.remove(&next) else {
                break;
            };
            inner.next_expected_seq = next.wrapping_add(1);
            tracing::trace!(seq = frame.seq, "delivering buffered frame");
            deliverable.push(frame);
        }

        deliverable
    }

    /// Sequence numbers missing between `next_expected_seq` and the highest
    /// buffered arrival, in ascending order. Drives receive-side NACKs.
    pub fn get_missing_seqs(&self) -> Vec<u32> {
        let inner = self.inner.lock();
        let Some(max_buffered) = inner.recv_buffer.keys().next_back().copied() else {
            return Vec::new();
        };

        (inner.next_expected_seq..max_buffered)
            .filter(|seq| !inner.recv_buffer.contains_key(seq))
            .collect()
    }

    /// Reset all window state (used by RST).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.recv_buffer.clear();
        inner.next_seq = 0;
        inner.next_expected_seq = 0;
    }
}
