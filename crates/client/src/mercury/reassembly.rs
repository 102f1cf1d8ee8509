//! Reassembly of Mercury messages split over several packets.

use std::collections::HashMap;

use bytes::Bytes;
use protocol::{MercuryPacket, MercuryResponse, ProtocolError, Result};

/// Incomplete messages kept at once. A packet opening one more is rejected.
pub const MAX_IN_PROGRESS: usize = 256;

/// Upper bound on the accumulated part bytes of a single message.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Default)]
struct Partial {
    parts: Vec<Bytes>,
    size: usize,
}

/// Per-sequence part buffers, owned by the dispatch loop.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<u64, Partial>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a packet's parts to its sequence's buffer.
    ///
    /// Returns the completed message once the final packet arrives. A final
    /// packet for a sequence that never carried any part is an error, as is
    /// a message that outgrows [`MAX_MESSAGE_SIZE`] or a new sequence beyond
    /// [`MAX_IN_PROGRESS`]. Either limit drops whatever was buffered for the
    /// offending sequence.
    pub fn push(&mut self, packet: MercuryPacket) -> Option<Result<MercuryResponse>> {
        let is_final = packet.is_final();
        let MercuryPacket {
            sequence, parts, ..
        } = packet;

        if !is_final
            && !self.pending.contains_key(&sequence)
            && self.pending.len() >= MAX_IN_PROGRESS
        {
            return Some(Err(ProtocolError::Deserialization(format!(
                "too many incomplete mercury messages (limit {})",
                MAX_IN_PROGRESS
            ))));
        }

        let mut partial = self.pending.remove(&sequence).unwrap_or_default();
        partial.size += parts.iter().map(Bytes::len).sum::<usize>();
        if partial.size > MAX_MESSAGE_SIZE {
            return Some(Err(ProtocolError::FrameTooLarge {
                size: partial.size,
                max: MAX_MESSAGE_SIZE,
            }));
        }
        partial.parts.extend(parts);

        if !is_final {
            self.pending.insert(sequence, partial);
            return None;
        }

        Some(MercuryResponse::from_parts(sequence, partial.parts))
    }

    /// Drops the buffer for `sequence`, returning whether one existed.
    pub fn discard(&mut self, sequence: u64) -> bool {
        self.pending.remove(&sequence).is_some()
    }

    /// Number of sequences with buffered, incomplete messages.
    pub fn in_progress(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use protocol::proto::Header;
    use protocol::ProtocolError;

    fn header(uri: &str) -> Bytes {
        Header {
            uri: Some(uri.to_string()),
            status_code: Some(200),
            ..Default::default()
        }
        .encode_to_vec()
        .into()
    }

    fn packet(sequence: u64, flags: u8, parts: Vec<Bytes>) -> MercuryPacket {
        MercuryPacket {
            sequence,
            flags,
            parts,
        }
    }

    #[test]
    fn test_three_packets_reassemble_in_order() {
        let mut reassembler = Reassembler::new();
        let h = header("hm://a/b");

        assert!(reassembler.push(packet(7, 0, vec![h.clone()])).is_none());
        assert!(reassembler
            .push(packet(7, 0, vec![Bytes::from_static(b"one")]))
            .is_none());
        assert_eq!(reassembler.in_progress(), 1);

        let response = reassembler
            .push(packet(7, 1, vec![Bytes::from_static(b"two")]))
            .unwrap()
            .unwrap();

        assert_eq!(response.sequence(), 7);
        assert_eq!(response.uri(), "hm://a/b");
        assert_eq!(
            response.parts(),
            &[h, Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );
        assert_eq!(reassembler.in_progress(), 0);
    }

    #[test]
    fn test_interleaved_sequences_stay_separate() {
        let mut reassembler = Reassembler::new();

        reassembler.push(packet(1, 0, vec![header("hm://one")]));
        reassembler.push(packet(2, 0, vec![header("hm://two")]));

        let two = reassembler
            .push(packet(2, 1, vec![Bytes::from_static(b"2")]))
            .unwrap()
            .unwrap();
        let one = reassembler
            .push(packet(1, 1, vec![Bytes::from_static(b"1")]))
            .unwrap()
            .unwrap();

        assert_eq!(one.uri(), "hm://one");
        assert_eq!(one.payload(), &[Bytes::from_static(b"1")]);
        assert_eq!(two.uri(), "hm://two");
        assert_eq!(two.payload(), &[Bytes::from_static(b"2")]);
    }

    #[test]
    fn test_single_final_packet() {
        let mut reassembler = Reassembler::new();
        let response = reassembler
            .push(packet(3, 1, vec![header("hm://x")]))
            .unwrap()
            .unwrap();
        assert_eq!(response.uri(), "hm://x");
        assert!(response.payload().is_empty());
    }

    #[test]
    fn test_final_without_data_is_error() {
        let mut reassembler = Reassembler::new();
        let result = reassembler.push(packet(9, 1, vec![])).unwrap();
        assert!(matches!(result, Err(ProtocolError::Deserialization(_))));
        assert_eq!(reassembler.in_progress(), 0);
    }

    #[test]
    fn test_bad_header_consumes_buffer() {
        let mut reassembler = Reassembler::new();
        reassembler.push(packet(4, 0, vec![Bytes::from_static(&[0xff, 0xff])]));
        let result = reassembler.push(packet(4, 1, vec![])).unwrap();
        assert!(result.is_err());
        assert_eq!(reassembler.in_progress(), 0);
    }

    #[test]
    fn test_unfinished_sequences_are_bounded() {
        let mut reassembler = Reassembler::new();
        let chunk = Bytes::from(vec![0u8; 1024]);

        let mut rejected = 0;
        for sequence in 0..10_000u64 {
            if let Some(result) = reassembler.push(packet(sequence, 0, vec![chunk.clone()])) {
                assert!(matches!(result, Err(ProtocolError::Deserialization(_))));
                rejected += 1;
            }
        }

        assert_eq!(reassembler.in_progress(), MAX_IN_PROGRESS);
        assert_eq!(rejected, 10_000 - MAX_IN_PROGRESS);

        // Sequences already buffered keep accepting parts at the limit.
        assert!(reassembler.push(packet(0, 0, vec![chunk])).is_none());
        assert!(reassembler.discard(0));
        assert!(!reassembler.discard(0));
        assert!(reassembler
            .push(packet(20_000, 0, vec![header("hm://late")]))
            .is_none());
        assert_eq!(reassembler.in_progress(), MAX_IN_PROGRESS);
    }

    #[test]
    fn test_oversized_message_is_dropped() {
        let mut reassembler = Reassembler::new();
        let chunk = Bytes::from(vec![0u8; 60_000]);

        reassembler.push(packet(5, 0, vec![header("hm://big")]));
        let mut outcome = None;
        for _ in 0..(MAX_MESSAGE_SIZE / chunk.len() + 1) {
            outcome = reassembler.push(packet(5, 0, vec![chunk.clone()]));
            if outcome.is_some() {
                break;
            }
        }

        match outcome {
            Some(Err(ProtocolError::FrameTooLarge { size, max })) => {
                assert!(size > max);
                assert_eq!(max, MAX_MESSAGE_SIZE);
            }
            other => panic!("expected size error, got {:?}", other),
        }
        assert_eq!(reassembler.in_progress(), 0);
    }
}
