use thiserror::Error;

/// All errors produced by the meshstream transport core.
#[derive(Debug, Error)]
pub enum MeshStreamError {
    #[error("frame too short: {actual} bytes, minimum {expected}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("crc mismatch: received {received:#010x}, computed {computed:#010x}")]
    CrcMismatch { received: u32, computed: u32 },

    #[error("frame length mismatch: header says {expected} payload bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("stream {0:#x} not found")]
    StreamNotFound(u32),

    #[error("stream {0:#x} is closed")]
    StreamClosed(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MeshStreamError>;
