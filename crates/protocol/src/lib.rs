//! # Access Point Protocol Library
//!
//! Wire-level definitions and cryptographic primitives for talking to an
//! access point over a single long-lived TCP connection.
//!
//! ## Overview
//!
//! This crate is synchronous and performs no I/O. It provides:
//!
//! - **Key Agreement**: Diffie-Hellman over the 768-bit Oakley group 1
//! - **Handshake**: Client hello, RSA-SHA1 verified challenge, HMAC-SHA1 key derivation
//! - **Stream Cipher**: Shannon with its per-frame authentication tag
//! - **Frame Codec**: Encrypted `command | length | payload | tag` frames
//! - **Mercury**: The multiplexed request/response sub-protocol codec
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Mercury Packets              │  seq | flags | parts
//! ├─────────────────────────────────────────┤
//! │          Encrypted Frames               │  Shannon + 4-byte tag
//! ├─────────────────────────────────────────┤
//! │             Handshake                   │  DH + RSA + HMAC-SHA1
//! ├─────────────────────────────────────────┤
//! │                TCP                      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use bytes::BytesMut;
//! use protocol::{Frame, PacketType, SessionKeys, TagPolicy};
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let keys = SessionKeys { send_key: [1; 32], receive_key: [2; 32] };
//! let (mut encoder, _) = keys.clone().into_codecs(TagPolicy::Enforce);
//! let (_, mut peer_decoder) = keys.mirrored().into_codecs(TagPolicy::Enforce);
//!
//! let mut wire = BytesMut::new();
//! encoder.encode(Frame::new(PacketType::Ping, vec![0xaa, 0xbb]), &mut wire).unwrap();
//! let frame = peer_decoder.decode(&mut wire).unwrap().unwrap();
//! assert_eq!(frame.packet_type(), Some(PacketType::Ping));
//! ```
//!
//! ## Modules
//!
//! - [`dh`]: Diffie-Hellman key agreement
//! - [`shannon`]: Shannon stream cipher
//! - [`framing`]: Encrypted frame codec
//! - [`handshake`]: Handshake state machine and key derivation
//! - [`mercury`]: Mercury packet codec
//! - [`packet`]: Frame command bytes
//! - [`proto`]: Protobuf messages
//! - [`error`]: Error types

pub mod dh;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod mercury;
pub mod packet;
pub mod proto;
pub mod shannon;

pub use dh::DhLocalKeys;
pub use error::{ProtocolError, Result};
pub use framing::{ApDecoder, ApEncoder, Frame, TagPolicy, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use handshake::{
    ClientHandshake, HandshakeConfig, HandshakePhase, KeyMaterial, ServerKey, SessionKeys,
};
pub use mercury::{
    MercuryHeader, MercuryMethod, MercuryPacket, MercuryRequest, MercuryResponse, FLAG_FINAL,
};
pub use packet::PacketType;
pub use shannon::{Shannon, StreamCipher, TAG_SIZE};
