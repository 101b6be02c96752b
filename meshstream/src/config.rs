//! Protocol configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::clamp_chunk_size;
use crate::error::{MeshStreamError, Result};

/// Hard upper bound on the sliding window.
pub const MAX_WINDOW_SIZE: usize = 32;

/// ACK/NACK emission strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMethod {
    /// One ACK per delivery, one NACK per observed gap.
    Basic,
    /// Coalesced ACKs and debounced NACKs.
    Smart,
}

/// Tunables for the stream transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum unacknowledged frames in flight per stream.
    pub window_size: usize,
    /// Payload bytes per frame; clamped to the 180-byte frame maximum.
    pub chunk_payload_size: usize,
    /// Age at which a pending frame is retransmitted.
    pub retransmit_timeout_ms: u64,
    /// Retransmit attempts before the stream is abandoned.
    pub max_retransmits: u32,
    /// Inactivity timeout after which a stream is reset.
    pub stream_timeout_s: u64,
    /// Interval of the periodic retransmit sweep.
    pub tick_interval_ms: u64,
    /// ACK/NACK policy applied to new streams.
    pub ack_method: AckMethod,
    /// Smart policy: deliveries accumulated before a cumulative ACK.
    pub ack_every_n: u32,
    /// Smart policy: maximum delay before a cumulative ACK.
    pub ack_interval_ms: u64,
    /// Smart policy: minimum gap between NACKs for the same sequence.
    pub nack_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: 4,
            chunk_payload_size: 180,
            retransmit_timeout_ms: 5000,
            max_retransmits: 5,
            stream_timeout_s: 120,
            tick_interval_ms: 1000,
            ack_method: AckMethod::Smart,
            ack_every_n: 4,
            ack_interval_ms: 500,
            nack_interval_ms: 500,
        }
    }
}

impl Config {
    /// Validate operator-supplied values.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(MeshStreamError::InvalidConfig(format!(
                "window_size must be 1..={MAX_WINDOW_SIZE}, got {}",
                self.window_size
            )));
        }
        if self.retransmit_timeout_ms < 1000 {
            return Err(MeshStreamError::InvalidConfig(format!(
                "retransmit_timeout_ms must be at least 1000, got {}",
                self.retransmit_timeout_ms
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(MeshStreamError::InvalidConfig(
                "tick_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Effective per-frame payload size after clamping.
    pub fn chunk_size(&self) -> usize {
        clamp_chunk_size(self.chunk_payload_size)
    }

    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_s)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn ack_interval(&self) -> Duration {
        Duration::from_millis(self.ack_interval_ms)
    }

    pub fn nack_interval(&self) -> Duration {
        Duration::from_millis(self.nack_interval_ms)
    }
}
