//! Command bytes of the encrypted access point protocol.

use std::fmt;

/// The command byte at the start of every encrypted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Opaque secret block pushed by the server after login.
    SecretBlock = 0x02,
    /// Keep-alive request from the server, answered with `Pong`.
    Ping = 0x04,
    /// Audio data channel chunk.
    StreamChunk = 0x08,
    /// Response to a stream chunk request.
    StreamChunkRes = 0x09,
    /// Error on an audio data channel.
    ChannelError = 0x0a,
    /// Server aborted an audio data channel.
    ChannelAbort = 0x0b,
    /// Audio key request sent by the client.
    RequestKey = 0x0c,
    /// Audio key reply.
    AesKey = 0x0d,
    /// Audio key refusal.
    AesKeyError = 0x0e,
    /// Image data.
    Image = 0x19,
    /// ASCII country code of the account.
    CountryCode = 0x1b,
    /// Unidentified frame with an all-zero payload.
    UnknownDataAllZeros = 0x1f,
    /// Keep-alive answer echoing the ping payload.
    Pong = 0x49,
    /// Server acknowledgement of a pong.
    PongAck = 0x4a,
    /// Playback pause notification.
    Pause = 0x4b,
    /// XML description of the account's product attributes.
    ProductInfo = 0x50,
    /// Welcome message kept for older clients.
    LegacyWelcome = 0x69,
    /// License version announcement.
    LicenseVersion = 0x76,
    /// Client credentials, sent once after the handshake.
    Login = 0xab,
    /// Login accepted.
    ApWelcome = 0xac,
    /// Login rejected.
    AuthFailure = 0xad,
    /// Mercury GET or SEND request and its reply.
    MercuryReq = 0xb2,
    /// Mercury subscription request and its reply.
    MercurySub = 0xb3,
    /// Mercury unsubscription request and its reply.
    MercuryUnsub = 0xb4,
    /// Mercury event pushed by the server.
    MercuryEvent = 0xb5,
    /// Playback end time report.
    TrackEndedTime = 0x82,
    /// Preferred locale, sent right after login.
    PreferredLocale = 0x74,
    /// Unidentified command 0x0f.
    Unknown0x0f = 0x0f,
    /// Unidentified command 0x10.
    Unknown0x10 = 0x10,
    /// Unidentified command 0x4f.
    Unknown0x4f = 0x4f,
    /// Unidentified command 0xb6.
    Unknown0xb6 = 0xb6,
}

impl PacketType {
    /// Maps a raw command byte to a known packet type.
    pub fn from_u8(value: u8) -> Option<Self> {
        use PacketType::*;
        let packet = match value {
            0x02 => SecretBlock,
            0x04 => Ping,
            0x08 => StreamChunk,
            0x09 => StreamChunkRes,
            0x0a => ChannelError,
            0x0b => ChannelAbort,
            0x0c => RequestKey,
            0x0d => AesKey,
            0x0e => AesKeyError,
            0x0f => Unknown0x0f,
            0x10 => Unknown0x10,
            0x19 => Image,
            0x1b => CountryCode,
            0x1f => UnknownDataAllZeros,
            0x49 => Pong,
            0x4a => PongAck,
            0x4b => Pause,
            0x4f => Unknown0x4f,
            0x50 => ProductInfo,
            0x69 => LegacyWelcome,
            0x74 => PreferredLocale,
            0x76 => LicenseVersion,
            0x82 => TrackEndedTime,
            0xab => Login,
            0xac => ApWelcome,
            0xad => AuthFailure,
            0xb2 => MercuryReq,
            0xb3 => MercurySub,
            0xb4 => MercuryUnsub,
            0xb5 => MercuryEvent,
            0xb6 => Unknown0xb6,
            _ => return None,
        };
        Some(packet)
    }

    /// Returns the raw command byte.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for the four commands that carry Mercury packets.
    pub fn is_mercury(self) -> bool {
        matches!(
            self,
            PacketType::MercuryReq
                | PacketType::MercurySub
                | PacketType::MercuryUnsub
                | PacketType::MercuryEvent
        )
    }
}

impl From<PacketType> for u8 {
    fn from(packet: PacketType) -> u8 {
        packet as u8
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#04x})", self, self.as_u8())
    }
}
