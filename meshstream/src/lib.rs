//! meshstream -- reliable multiplexed stream transport over Meshtastic LoRa
//! datagrams.
//!
//! A miniature TCP-like protocol sized for a radio link with a ~230-byte
//! packet ceiling and goodput in the tens of bytes per second:
//! - a 19-byte-overhead binary frame with CRC32 integrity,
//! - a per-stream sliding window with retransmission,
//! - an in-order reassembling receiver with out-of-order buffering,
//! - pluggable ACK/NACK emission policies (basic and smart).
//!
//! The radio itself is consumed through the narrow [`transport::DatagramSender`]
//! seam: one best-effort datagram to a node id, duplicates and reordering
//! expected, no hop-by-hop acknowledgements assumed.

pub mod chunking;
pub mod config;
pub mod error;
pub mod frame;
pub mod policy;
pub mod stream;
pub mod ticker;
pub mod transport;
pub mod window;

// Re-export key public types at crate root.
pub use config::{AckMethod, Config};
pub use error::{MeshStreamError, Result};
pub use frame::{Frame, FrameFlags, FRAME_OVERHEAD, MAX_PAYLOAD_SIZE};
pub use policy::{AckPolicy, BasicAckNack, SmartAckNack};
pub use stream::{StatsSnapshot, Stream, StreamState, StreamStats};
pub use ticker::RetransmitTicker;
pub use transport::DatagramSender;
pub use window::{PendingFrame, SlidingWindow};
