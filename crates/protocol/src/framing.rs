//! Encrypted frame codec for the post-handshake connection.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 1 byte: command
//! - 2 bytes: payload length (big-endian)
//! - N bytes: payload
//! - 4 bytes: authentication tag
//!
//! Command, length and payload are encrypted with the direction's
//! [`StreamCipher`]; the tag is its `finish` output and travels in clear.
//! Each frame uses a fresh nonce derived from the frame counter.
//!
//! [`ApEncoder`] and [`ApDecoder`] plug into `tokio_util::codec` so the
//! write half and the read half of a connection can be owned by different
//! tasks.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use subtle::ConstantTimeEq;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, Result};
use crate::packet::PacketType;
use crate::shannon::{StreamCipher, TAG_SIZE};

/// Frame header size: 1 (command) + 2 (length) = 3 bytes.
pub const FRAME_HEADER_SIZE: usize = 3;

/// Maximum payload size, bounded by the 16-bit length field.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// A decrypted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw command byte.
    pub command: u8,
    /// The payload data.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(command: impl Into<u8>, payload: impl Into<Bytes>) -> Self {
        Self {
            command: command.into(),
            payload: payload.into(),
        }
    }

    /// The command as a known packet type, if it is one.
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u8(self.command)
    }
}

/// What to do when a received tag does not match the locally computed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagPolicy {
    /// Reject the frame with [`ProtocolError::FrameIntegrity`].
    #[default]
    Enforce,
    /// Log a warning and accept the frame.
    Lenient,
}

impl FromStr for TagPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enforce" => Ok(TagPolicy::Enforce),
            "lenient" => Ok(TagPolicy::Lenient),
            other => Err(format!(
                "tag_policy must be one of: enforce, lenient; got {}",
                other
            )),
        }
    }
}

impl fmt::Display for TagPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagPolicy::Enforce => f.write_str("enforce"),
            TagPolicy::Lenient => f.write_str("lenient"),
        }
    }
}

/// Encrypting half of the frame codec.
#[derive(Debug)]
pub struct ApEncoder {
    cipher: StreamCipher,
}

impl ApEncoder {
    /// Create an encoder keyed with the send-direction key.
    pub fn new(send_key: &[u8]) -> Self {
        Self {
            cipher: StreamCipher::new(send_key),
        }
    }

    /// Number of frames encoded so far.
    pub fn frames_sent(&self) -> u32 {
        self.cipher.frame_count()
    }
}

impl Encoder<Frame> for ApEncoder {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let payload_len = frame.payload.len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let start = dst.len();
        dst.reserve(FRAME_HEADER_SIZE + payload_len + TAG_SIZE);
        dst.put_u8(frame.command);
        dst.put_u16(payload_len as u16);
        dst.extend_from_slice(&frame.payload);

        self.cipher.begin_frame();
        self.cipher.encrypt(&mut dst[start..]);
        let tag = self.cipher.finish();
        dst.extend_from_slice(&tag);

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Header,
    Payload { command: u8, size: usize },
}

/// Decrypting half of the frame codec.
///
/// The header is decrypted as soon as its three bytes are buffered so the
/// payload length is known; the payload and tag follow once complete.
#[derive(Debug)]
pub struct ApDecoder {
    cipher: StreamCipher,
    policy: TagPolicy,
    state: DecodeState,
}

impl ApDecoder {
    /// Create a decoder keyed with the receive-direction key.
    pub fn new(receive_key: &[u8], policy: TagPolicy) -> Self {
        Self {
            cipher: StreamCipher::new(receive_key),
            policy,
            state: DecodeState::Header,
        }
    }

    /// The tag policy in force.
    pub fn policy(&self) -> TagPolicy {
        self.policy
    }

    /// Number of frames started so far.
    pub fn frames_received(&self) -> u32 {
        self.cipher.frame_count()
    }
}

impl Decoder for ApDecoder {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let DecodeState::Header = self.state {
            if src.len() < FRAME_HEADER_SIZE {
                return Ok(None);
            }

            self.cipher.begin_frame();
            let mut header = src.split_to(FRAME_HEADER_SIZE);
            self.cipher.decrypt(&mut header);

            let command = header[0];
            let size = u16::from_be_bytes([header[1], header[2]]) as usize;
            self.state = DecodeState::Payload { command, size };
            src.reserve(size + TAG_SIZE);
        }

        let DecodeState::Payload { command, size } = self.state else {
            return Ok(None);
        };

        if src.len() < size + TAG_SIZE {
            return Ok(None);
        }

        let mut payload = src.split_to(size);
        self.cipher.decrypt(&mut payload);
        let received = src.split_to(TAG_SIZE);
        let expected = self.cipher.finish();
        self.state = DecodeState::Header;

        if !bool::from(expected[..].ct_eq(&received[..])) {
            let expected = u32::from_be_bytes(expected);
            let received = u32::from_be_bytes([received[0], received[1], received[2], received[3]]);
            match self.policy {
                TagPolicy::Enforce => {
                    return Err(ProtocolError::FrameIntegrity { expected, received });
                }
                TagPolicy::Lenient => {
                    tracing::warn!(
                        command,
                        expected = format_args!("{:#010x}", expected),
                        received = format_args!("{:#010x}", received),
                        "Frame tag mismatch accepted under lenient policy"
                    );
                }
            }
        }

        Ok(Some(Frame {
            command,
            payload: payload.freeze(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> Vec<u8> {
        (0u8..32).map(|b| b.wrapping_add(seed)).collect()
    }

    fn pair(policy: TagPolicy) -> (ApEncoder, ApDecoder) {
        (ApEncoder::new(&key(0)), ApDecoder::new(&key(0), policy))
    }

    #[test]
    fn test_encode_matches_reference_cipher() {
        // Second frame under the 0..32 key: Ping [aa bb] at nonce 1.
        let mut encoder = ApEncoder::new(&key(0));
        let mut dst = BytesMut::new();
        encoder
            .encode(Frame::new(0x02u8, vec![0u8; 40]), &mut dst)
            .unwrap();
        dst.clear();

        encoder
            .encode(Frame::new(PacketType::Ping, vec![0xaa, 0xbb]), &mut dst)
            .unwrap();
        assert_eq!(hex::encode(&dst), "bf972405537da55f44");
        assert_eq!(encoder.frames_sent(), 2);
    }

    #[test]
    fn test_roundtrip() {
        let (mut encoder, mut decoder) = pair(TagPolicy::Enforce);
        let frames = vec![
            Frame::new(PacketType::Ping, vec![0xaa, 0xbb]),
            Frame::new(PacketType::MercuryReq, vec![7u8; 1000]),
            Frame::new(PacketType::CountryCode, Bytes::from_static(b"SE")),
            Frame::new(0x99u8, Bytes::new()),
        ];

        let mut wire = BytesMut::new();
        for frame in &frames {
            encoder.encode(frame.clone(), &mut wire).unwrap();
        }

        for frame in &frames {
            assert_eq!(decoder.decode(&mut wire).unwrap().as_ref(), Some(frame));
        }
        assert!(wire.is_empty());
        assert_eq!(decoder.decode(&mut wire).unwrap(), None);
        assert_eq!(decoder.frames_received(), 4);
    }

    #[test]
    fn test_wire_layout() {
        let mut encoder = ApEncoder::new(&key(0));
        let mut wire = BytesMut::new();
        encoder
            .encode(Frame::new(PacketType::Pong, vec![1, 2, 3, 4, 5]), &mut wire)
            .unwrap();
        assert_eq!(wire.len(), FRAME_HEADER_SIZE + 5 + TAG_SIZE);
    }

    #[test]
    fn test_partial_input() {
        let (mut encoder, mut decoder) = pair(TagPolicy::Enforce);
        let frame = Frame::new(PacketType::MercuryEvent, vec![0x55; 64]);
        let mut wire = BytesMut::new();
        encoder.encode(frame.clone(), &mut wire).unwrap();

        let mut feed = BytesMut::new();
        let mut decoded = None;
        for byte in wire.iter() {
            feed.put_u8(*byte);
            if let Some(f) = decoder.decode(&mut feed).unwrap() {
                decoded = Some(f);
            }
        }
        assert_eq!(decoded, Some(frame));
        assert_eq!(decoder.frames_received(), 1);
    }

    #[test]
    fn test_payload_too_large() {
        let mut encoder = ApEncoder::new(&key(0));
        let mut wire = BytesMut::new();
        let result = encoder.encode(
            Frame::new(PacketType::MercuryReq, vec![0u8; MAX_PAYLOAD_SIZE + 1]),
            &mut wire,
        );
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { size, max }) if size == MAX_PAYLOAD_SIZE + 1 && max == MAX_PAYLOAD_SIZE
        ));
        assert!(wire.is_empty());
        assert_eq!(encoder.frames_sent(), 0);
    }

    #[test]
    fn test_max_payload_roundtrip() {
        let (mut encoder, mut decoder) = pair(TagPolicy::Enforce);
        let frame = Frame::new(PacketType::StreamChunkRes, vec![0xcd; MAX_PAYLOAD_SIZE]);
        let mut wire = BytesMut::new();
        encoder.encode(frame.clone(), &mut wire).unwrap();
        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(frame));
    }

    #[test]
    fn test_tampered_tag_rejected_when_enforced() {
        let (mut encoder, mut decoder) = pair(TagPolicy::Enforce);
        let mut wire = BytesMut::new();
        encoder
            .encode(Frame::new(PacketType::Ping, vec![0xaa, 0xbb]), &mut wire)
            .unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        let err = decoder.decode(&mut wire).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameIntegrity { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_tampered_tag_accepted_when_lenient() {
        let (mut encoder, mut decoder) = pair(TagPolicy::Lenient);
        let frame = Frame::new(PacketType::Ping, vec![0xaa, 0xbb]);
        let mut wire = BytesMut::new();
        encoder.encode(frame.clone(), &mut wire).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(frame));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let (mut encoder, mut decoder) = pair(TagPolicy::Enforce);
        let mut wire = BytesMut::new();
        encoder
            .encode(Frame::new(PacketType::MercuryReq, vec![1u8; 16]), &mut wire)
            .unwrap();
        wire[FRAME_HEADER_SIZE + 4] ^= 0x80;

        assert!(matches!(
            decoder.decode(&mut wire),
            Err(ProtocolError::FrameIntegrity { .. })
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let mut encoder = ApEncoder::new(&key(0));
        let mut decoder = ApDecoder::new(&key(1), TagPolicy::Enforce);
        let mut wire = BytesMut::new();
        // A zero-length payload keeps the decrypted length field harmless.
        encoder
            .encode(Frame::new(PacketType::Ping, Bytes::new()), &mut wire)
            .unwrap();
        wire.extend_from_slice(&[0u8; MAX_PAYLOAD_SIZE + TAG_SIZE]);

        assert!(matches!(
            decoder.decode(&mut wire),
            Err(ProtocolError::FrameIntegrity { .. })
        ));
    }

    #[test]
    fn test_frame_packet_type() {
        assert_eq!(
            Frame::new(0x4au8, Bytes::new()).packet_type(),
            Some(PacketType::PongAck)
        );
        assert_eq!(Frame::new(0xeeu8, Bytes::new()).packet_type(), None);
    }

    #[test]
    fn test_tag_policy_parse() {
        assert_eq!("enforce".parse::<TagPolicy>(), Ok(TagPolicy::Enforce));
        assert_eq!("Lenient".parse::<TagPolicy>(), Ok(TagPolicy::Lenient));
        assert!("strict".parse::<TagPolicy>().is_err());
        assert_eq!(TagPolicy::default(), TagPolicy::Enforce);
        assert_eq!(TagPolicy::Lenient.to_string(), "lenient");
    }
}
