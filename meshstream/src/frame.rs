//! Wire frame and codec for the LoRa stream transport.
//!
//! Binary layout (all integers little-endian):
//!
//! ```text
//! | offset | size | field       |
//! |--------|------|-------------|
//! | 0      | 4    | stream_id   |
//! | 4      | 4    | seq         |
//! | 8      | 4    | ack         |
//! | 12     | 1    | flags       |
//! | 13     | 2    | payload_len |
//! | 15     | N    | payload     |
//! | 15+N   | 4    | crc32       |
//! ```
//!
//! The CRC32 (IEEE polynomial, zlib variant) covers header and payload.
//! A frame always travels as exactly one radio datagram; the 180-byte
//! payload cap leaves headroom under the radio's hard packet limit.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{MeshStreamError, Result};

/// Header size without payload and CRC.
pub const FRAME_HEADER_SIZE: usize = 15;
/// CRC32 trailer size.
pub const FRAME_CRC_SIZE: usize = 4;
/// Total per-frame overhead.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + FRAME_CRC_SIZE;
/// Maximum payload bytes in a single frame.
pub const MAX_PAYLOAD_SIZE: usize = 180;

const FRAME_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Control flags carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
    pub const NONE: Self = Self(0x00);
    /// Stream synchronization (open stream).
    pub const SYN: Self = Self(0x01);
    /// Stream finish (close stream).
    pub const FIN: Self = Self(0x02);
    /// Stream reset (abort stream).
    pub const RST: Self = Self(0x04);
    /// Acknowledgment.
    pub const ACK: Self = Self(0x08);
    /// Negative acknowledgment (request retransmit).
    pub const NACK: Self = Self(0x10);

    /// Bits with assigned meaning; 0x20/0x40/0x80 are reserved and must be
    /// zero on the wire.
    const DEFINED: u8 = 0x1F;

    pub fn contains(self, flag: FrameFlags) -> bool {
        (self.0 & flag.0) == flag.0
    }

    fn wire_bits(self) -> u8 {
        self.0 & Self::DEFINED
    }
}

impl BitOr for FrameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FrameFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for FrameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(FrameFlags, &str); 5] = [
            (FrameFlags::SYN, "SYN"),
            (FrameFlags::FIN, "FIN"),
            (FrameFlags::RST, "RST"),
            (FrameFlags::ACK, "ACK"),
            (FrameFlags::NACK, "NACK"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "NONE")?;
        }
        Ok(())
    }
}

/// A single frame of the stream transport.
///
/// A frame either carries user payload or is a pure control frame with an
/// empty payload; both may piggyback flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: u32,
    pub seq: u32,
    pub ack: u32,
    pub flags: FrameFlags,
    pub payload: Bytes,
}

impl Frame {
    /// Build a pure control frame (empty payload).
    pub fn control(stream_id: u32, seq: u32, ack: u32, flags: FrameFlags) -> Self {
        Self {
            stream_id,
            seq,
            ack,
            flags,
            payload: Bytes::new(),
        }
    }

    /// Build a frame carrying payload bytes.
    pub fn data(stream_id: u32, seq: u32, ack: u32, flags: FrameFlags, payload: Bytes) -> Self {
        Self {
            stream_id,
            seq,
            ack,
            flags,
            payload,
        }
    }

    pub fn is_syn(&self) -> bool {
        self.flags.contains(FrameFlags::SYN)
    }

    pub fn is_fin(&self) -> bool {
        self.flags.contains(FrameFlags::FIN)
    }

    pub fn is_rst(&self) -> bool {
        self.flags.contains(FrameFlags::RST)
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(FrameFlags::ACK)
    }

    pub fn is_nack(&self) -> bool {
        self.flags.contains(FrameFlags::NACK)
    }

    /// The total number of bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Encode this frame for transmission.
    ///
    /// Reserved flag bits are masked off; the CRC is computed over
    /// header || payload and appended.
    pub fn encode(&self) -> Result<Bytes> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(MeshStreamError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32_le(self.stream_id);
        buf.put_u32_le(self.seq);
        buf.put_u32_le(self.ack);
        buf.put_u8(self.flags.wire_bits());
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_slice(&self.payload);

        let crc = FRAME_CRC.checksum(&buf);
        buf.put_u32_le(crc);
        Ok(buf.freeze())
    }

    /// Decode a frame received from the radio.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_OVERHEAD {
            return Err(MeshStreamError::FrameTooShort {
                expected: FRAME_OVERHEAD,
                actual: data.len(),
            });
        }

        let (body, trailer) = data.split_at(data.len() - FRAME_CRC_SIZE);
        let received = (&trailer[..]).get_u32_le();
        let computed = FRAME_CRC.checksum(body);
        if received != computed {
            return Err(MeshStreamError::CrcMismatch { received, computed });
        }

        let mut header = &body[..FRAME_HEADER_SIZE];
        let stream_id = header.get_u32_le();
        let seq = header.get_u32_le();
        let ack = header.get_u32_le();
        let flags = FrameFlags(header.get_u8());
        let payload_len = header.get_u16_le() as usize;

        let actual = body.len() - FRAME_HEADER_SIZE;
        if payload_len != actual {
            return Err(MeshStreamError::LengthMismatch {
                expected: payload_len,
                actual,
            });
        }

        Ok(Self {
            stream_id,
            seq,
            ack,
            flags,
            payload: Bytes::copy_from_slice(&body[FRAME_HEADER_SIZE..]),
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame(stream={:#x}, seq={}, ack={}, flags={}, payload_len={})",
            self.stream_id,
            self.seq,
            self.ack,
            self.flags,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_display() {
        assert_eq!(FrameFlags::NONE.to_string(), "NONE");
        assert_eq!((FrameFlags::SYN | FrameFlags::ACK).to_string(), "SYN|ACK");
        assert_eq!(
            (FrameFlags::FIN | FrameFlags::ACK | FrameFlags::NACK).to_string(),
            "FIN|ACK|NACK"
        );
    }

    #[test]
    fn reserved_bits_masked_on_encode() {
        let frame = Frame::control(1, 0, 0, FrameFlags(0xE8));
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded[12], 0x08);
    }

    #[test]
    fn encoded_len_matches_wire() {
        let frame = Frame::data(1, 2, 3, FrameFlags::ACK, Bytes::from_static(b"abc"));
        assert_eq!(frame.encode().unwrap().len(), frame.encoded_len());
    }
}
