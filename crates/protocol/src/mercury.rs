//! Mercury packet codec.
//!
//! A Mercury packet is the payload of a `MercuryReq`, `MercurySub`,
//! `MercuryUnsub` or `MercuryEvent` frame:
//!
//! ```text
//! u16 seq_len | seq (seq_len bytes) | u8 flags | u16 part_count
//!   | part_count * (u16 len | bytes)
//! ```
//!
//! The first part of a complete message is a protobuf [`Header`]. Messages
//! may be split over several packets sharing a sequence number; only the
//! packet with [`FLAG_FINAL`] completes the message.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;

use crate::error::{ProtocolError, Result};
use crate::packet::PacketType;
use crate::proto::Header;

/// Flag value marking the last packet of a message.
pub const FLAG_FINAL: u8 = 0x01;

/// Sequence length written on outgoing requests.
pub const REQUEST_SEQUENCE_LENGTH: u16 = 4;

/// Request method, carried in the header and selecting the frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MercuryMethod {
    /// Fetch a resource.
    Get,
    /// Subscribe to events under a URI.
    Sub,
    /// Cancel a subscription.
    Unsub,
    /// Post payload parts to a URI.
    Send,
}

impl MercuryMethod {
    /// Method string written into the header.
    pub fn as_str(self) -> &'static str {
        match self {
            MercuryMethod::Get => "GET",
            MercuryMethod::Sub => "SUB",
            MercuryMethod::Unsub => "UNSUB",
            MercuryMethod::Send => "SEND",
        }
    }

    /// Frame command carrying a request with this method.
    pub fn command(self) -> PacketType {
        match self {
            MercuryMethod::Get | MercuryMethod::Send => PacketType::MercuryReq,
            MercuryMethod::Sub => PacketType::MercurySub,
            MercuryMethod::Unsub => PacketType::MercuryUnsub,
        }
    }
}

impl fmt::Display for MercuryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request before a sequence number is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MercuryRequest {
    pub method: MercuryMethod,
    pub uri: String,
    pub content_type: Option<String>,
    pub payload: Vec<Bytes>,
}

impl MercuryRequest {
    /// A request without payload parts.
    pub fn new(method: MercuryMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            content_type: None,
            payload: Vec::new(),
        }
    }

    /// Adds a content type to the header.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Appends a payload part.
    pub fn with_part(mut self, part: impl Into<Bytes>) -> Self {
        self.payload.push(part.into());
        self
    }

    /// Encodes the request as a single final packet with a 4-byte sequence.
    pub fn encode(&self, sequence: u32) -> Result<Bytes> {
        let header = Header {
            uri: Some(self.uri.clone()),
            content_type: self.content_type.clone(),
            method: Some(self.method.as_str().to_string()),
            status_code: None,
            user_fields: Vec::new(),
        }
        .encode_to_vec();

        let part_count = 1 + self.payload.len();
        if part_count > u16::MAX as usize {
            return Err(ProtocolError::Serialization(format!(
                "too many payload parts: {}",
                self.payload.len()
            )));
        }

        let body_len: usize = 2 + header.len()
            + self.payload.iter().map(|p| 2 + p.len()).sum::<usize>();
        let mut buf = BytesMut::with_capacity(2 + 4 + 1 + 2 + body_len);
        buf.put_u16(REQUEST_SEQUENCE_LENGTH);
        buf.put_u32(sequence);
        buf.put_u8(FLAG_FINAL);
        buf.put_u16(part_count as u16);

        put_part(&mut buf, &header)?;
        for part in &self.payload {
            put_part(&mut buf, part)?;
        }

        Ok(buf.freeze())
    }
}

fn put_part(buf: &mut BytesMut, part: &[u8]) -> Result<()> {
    let len = u16::try_from(part.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: part.len(),
        max: u16::MAX as usize,
    })?;
    buf.put_u16(len);
    buf.extend_from_slice(part);
    Ok(())
}

/// One received Mercury packet, possibly a fragment of a larger message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MercuryPacket {
    pub sequence: u64,
    pub flags: u8,
    pub parts: Vec<Bytes>,
}

impl MercuryPacket {
    /// Parses a frame payload. Sequences of 2, 4 or 8 bytes are accepted.
    pub fn parse(payload: Bytes) -> Result<Self> {
        let mut buf = payload;

        let seq_len = read_u16(&mut buf, "sequence length")? as usize;
        if buf.remaining() < seq_len {
            return Err(truncated("sequence"));
        }
        let sequence = match seq_len {
            2 => buf.get_u16() as u64,
            4 => buf.get_u32() as u64,
            8 => buf.get_u64(),
            other => {
                return Err(ProtocolError::Deserialization(format!(
                    "unsupported mercury sequence length {}",
                    other
                )))
            }
        };

        if !buf.has_remaining() {
            return Err(truncated("flags"));
        }
        let flags = buf.get_u8();
        let count = read_u16(&mut buf, "part count")? as usize;

        let mut parts = Vec::with_capacity(count);
        for _ in 0..count {
            let len = read_u16(&mut buf, "part length")? as usize;
            if buf.remaining() < len {
                return Err(truncated("part"));
            }
            parts.push(buf.split_to(len));
        }

        Ok(Self {
            sequence,
            flags,
            parts,
        })
    }

    /// True when this packet completes its message.
    pub fn is_final(&self) -> bool {
        self.flags == FLAG_FINAL
    }
}

fn read_u16(buf: &mut Bytes, what: &str) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(truncated(what));
    }
    Ok(buf.get_u16())
}

fn truncated(what: &str) -> ProtocolError {
    ProtocolError::Deserialization(format!("mercury packet truncated in {}", what))
}

/// Decoded form of the header part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MercuryHeader {
    pub uri: String,
    pub status_code: i32,
    pub content_type: Option<String>,
}

impl MercuryHeader {
    /// Decodes a header part.
    pub fn parse(part: &[u8]) -> Result<Self> {
        let header = Header::decode(part)?;
        Ok(Self {
            uri: header.uri.unwrap_or_default(),
            status_code: header.status_code.unwrap_or_default(),
            content_type: header.content_type,
        })
    }

    /// True for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// A fully reassembled Mercury message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MercuryResponse {
    header: MercuryHeader,
    parts: Vec<Bytes>,
    sequence: u64,
}

impl MercuryResponse {
    /// Builds a response from reassembled parts, parsing the header from
    /// the first one. No parts at all is an error.
    pub fn from_parts(sequence: u64, parts: Vec<Bytes>) -> Result<Self> {
        let first = parts.first().ok_or_else(|| {
            ProtocolError::Deserialization(format!(
                "mercury message {} completed without any parts",
                sequence
            ))
        })?;
        let header = MercuryHeader::parse(first)?;
        Ok(Self {
            header,
            parts,
            sequence,
        })
    }

    pub fn header(&self) -> &MercuryHeader {
        &self.header
    }

    pub fn uri(&self) -> &str {
        &self.header.uri
    }

    pub fn status_code(&self) -> i32 {
        self.header.status_code
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// All parts in arrival order, the header part first.
    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    /// The parts after the header.
    pub fn payload(&self) -> &[Bytes] {
        self.parts.get(1..).unwrap_or_default()
    }
}
