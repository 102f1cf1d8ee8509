//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Cryptographic errors
    /// The remote Diffie-Hellman value is outside the accepted range.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    // Handshake errors
    /// Handshake exchange failed for a reason other than integrity or credentials.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The server signature over its Diffie-Hellman value did not verify.
    #[error("handshake integrity check failed: {0}")]
    HandshakeIntegrity(String),

    /// The access point explicitly rejected the client.
    #[error("authentication failed: {reason} (code {code})")]
    AuthenticationFailed {
        /// Raw error code reported by the server.
        code: i32,
        /// Human readable reason, from the server description or the code name.
        reason: String,
    },

    /// Attempted to use transport before handshake completion.
    #[error("handshake incomplete: cannot perform operation before handshake is finished")]
    HandshakeIncomplete,

    // Frame errors
    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The authentication tag of a received frame did not match.
    #[error("frame integrity check failed: expected tag {expected:#010x}, got {received:#010x}")]
    FrameIntegrity {
        /// Tag computed locally from the decrypted frame.
        expected: u32,
        /// Tag read from the wire.
        received: u32,
    },

    // Connection errors
    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Any other socket-level failure.
    #[error("i/o error: {0}")]
    Io(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<prost::EncodeError> for ProtocolError {
    fn from(err: prost::EncodeError) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

impl From<prost::DecodeError> for ProtocolError {
    fn from(err: prost::DecodeError) -> Self {
        ProtocolError::Deserialization(err.to_string())
    }
}

impl From<rsa::Error> for ProtocolError {
    fn from(err: rsa::Error) -> Self {
        ProtocolError::HandshakeIntegrity(err.to_string())
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed(err.to_string()),
            _ => ProtocolError::Io(err.to_string()),
        }
    }
}

impl ProtocolError {
    /// Returns true if the error leaves the connection unusable.
    ///
    /// Oversized frames are rejected before any cipher state advances and
    /// do not count.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionClosed(_)
                | ProtocolError::Io(_)
                | ProtocolError::Timeout(_)
                | ProtocolError::FrameIntegrity { .. }
        )
    }
}
