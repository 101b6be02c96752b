//! Chunking helpers for MTU-limited radio payloads.

use bytes::Bytes;

use crate::frame::MAX_PAYLOAD_SIZE;

/// Clamp a configured chunk size to the frame payload maximum.
///
/// Zero falls back to the maximum.
pub fn clamp_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        MAX_PAYLOAD_SIZE
    } else {
        chunk_size.min(MAX_PAYLOAD_SIZE)
    }
}

/// Split `data` into zero-copy chunks of at most `chunk_size` bytes.
pub fn iter_chunks(data: &Bytes, chunk_size: usize) -> impl Iterator<Item = Bytes> + '_ {
    let size = clamp_chunk_size(chunk_size);
    (0..data.len())
        .step_by(size)
        .map(move |start| data.slice(start..data.len().min(start + size)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_payload_max() {
        assert_eq!(clamp_chunk_size(0), MAX_PAYLOAD_SIZE);
        assert_eq!(clamp_chunk_size(64), 64);
        assert_eq!(clamp_chunk_size(4096), MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn splits_evenly_with_remainder() {
        let data = Bytes::from(vec![7u8; 450]);
        let chunks: Vec<_> = iter_chunks(&data, 180).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 180);
        assert_eq!(chunks[1].len(), 180);
        assert_eq!(chunks[2].len(), 90);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let data = Bytes::new();
        assert_eq!(iter_chunks(&data, 180).count(), 0);
    }

    #[test]
    fn reassembles_in_order() {
        let data = Bytes::from((0u8..=255).collect::<Vec<_>>());
        let mut joined = Vec::new();
        for chunk in iter_chunks(&data, 100) {
            joined.extend_from_slice(&chunk);
        }
        assert_eq!(&joined[..], &data[..]);
    }
}
