//! Error types for the client runtime.

use bytes::Bytes;
use protocol::{MercuryResponse, ProtocolError};
use thiserror::Error;

/// Errors raised while establishing or using a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Handshake, framing or login failure reported by the protocol layer.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No access point candidates were configured.
    #[error("no access point configured")]
    NoAccessPoint,

    /// Every access point candidate refused the TCP connection.
    #[error("no access point reachable (last error: {0})")]
    AccessPointUnreachable(String),

    /// The server answered the login with a command other than welcome or failure.
    #[error("unexpected packet 0x{0:02x} during login")]
    UnexpectedPacket(u8),

    /// The session has been torn down.
    #[error("session closed")]
    Closed,
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Protocol(err.into())
    }
}

impl From<prost::DecodeError> for SessionError {
    fn from(err: prost::DecodeError) -> Self {
        SessionError::Protocol(err.into())
    }
}

impl SessionError {
    /// Returns true for a server-side rejection of the credentials or client.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            SessionError::Protocol(ProtocolError::AuthenticationFailed { .. })
        )
    }
}

/// Errors returned by Mercury requests.
#[derive(Debug, Error)]
pub enum MercuryError {
    /// The server answered with a status outside `200..300`.
    #[error("mercury request failed with status {code}")]
    Status {
        /// Status code from the response header.
        code: i32,
        /// The full response, payload included.
        response: MercuryResponse,
    },

    /// The session ended before a response arrived.
    #[error("session closed before the response arrived")]
    Closed,

    /// Every 4-byte request sequence of this session has been used.
    #[error("mercury sequence numbers exhausted")]
    SequenceExhausted,

    /// The response could not be reassembled or parsed.
    #[error("malformed mercury response: {0}")]
    Protocol(#[from] ProtocolError),

    /// Sending the request failed.
    #[error("failed to send mercury request: {0}")]
    Session(SessionError),
}

impl From<SessionError> for MercuryError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Closed => MercuryError::Closed,
            other => MercuryError::Session(other),
        }
    }
}

impl MercuryError {
    /// Payload parts of a failed response, if the server sent one.
    pub fn payload(&self) -> Option<&[Bytes]> {
        match self {
            MercuryError::Status { response, .. } => Some(response.payload()),
            _ => None,
        }
    }
}

/// Errors returned by audio key requests.
#[derive(Debug, Error)]
pub enum AudioKeyError {
    /// The server refused to hand out the key.
    #[error("audio key request rejected with code 0x{code:04x}")]
    Rejected {
        /// Error code from the `AesKeyError` reply.
        code: u16,
    },

    /// No reply within the configured timeout.
    #[error("audio key request timed out")]
    Timeout,

    /// The session ended before a reply arrived.
    #[error("session closed before the key arrived")]
    Closed,

    /// The reply could not be parsed.
    #[error("malformed audio key reply: {0}")]
    Malformed(String),

    /// Sending the request failed.
    #[error("failed to send audio key request: {0}")]
    Session(SessionError),
}

impl From<SessionError> for AudioKeyError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Closed => AudioKeyError::Closed,
            other => AudioKeyError::Session(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            SessionError::UnexpectedPacket(0x4a).to_string(),
            "unexpected packet 0x4a during login"
        );
        assert_eq!(SessionError::Closed.to_string(), "session closed");
    }

    #[test]
    fn test_protocol_error_is_transparent() {
        let err: SessionError = ProtocolError::AuthenticationFailed {
            code: 12,
            reason: "BadCredentials".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "authentication failed: BadCredentials (code 12)"
        );
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_closed_session_maps_to_closed() {
        assert!(matches!(
            MercuryError::from(SessionError::Closed),
            MercuryError::Closed
        ));
        assert!(matches!(
            AudioKeyError::from(SessionError::Closed),
            AudioKeyError::Closed
        ));
        assert!(matches!(
            MercuryError::from(SessionError::NoAccessPoint),
            MercuryError::Session(SessionError::NoAccessPoint)
        ));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: SessionError = io.into();
        assert!(matches!(
            err,
            SessionError::Protocol(ProtocolError::ConnectionClosed(_))
        ));
    }

    #[test]
    fn test_audio_key_rejected_display() {
        let err = AudioKeyError::Rejected { code: 0x0001 };
        assert_eq!(err.to_string(), "audio key request rejected with code 0x0001");
    }

    #[test]
    fn test_errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SessionError>();
        assert_send_sync::<MercuryError>();
        assert_send_sync::<AudioKeyError>();
    }
}
