//! Async handshake driver and the established transport.
//!
//! [`handshake`] consumes the raw stream and only hands back a [`Transport`]
//! once keys are installed, so plaintext handshake I/O and encrypted framing
//! never share the socket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use protocol::handshake::{message_body_length, LENGTH_FIELD_SIZE};
use protocol::{
    ApDecoder, ApEncoder, ClientHandshake, Frame, HandshakeConfig, PacketType, ProtocolError,
    TagPolicy,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::credentials::{self, Credentials, Welcome};
use crate::error::SessionError;

/// Read half of an established connection.
pub type FrameReader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, ApDecoder>;

/// Write half of an established connection.
pub type FrameWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, ApEncoder>;

/// An encrypted connection whose handshake has completed.
pub struct Transport {
    reader: FrameReader,
    writer: FrameWriter,
}

impl Transport {
    /// Sends the login frame and waits for the server's verdict.
    ///
    /// Exactly one frame is read; anything other than a welcome or an
    /// authentication failure aborts the login.
    pub async fn authenticate(
        &mut self,
        credentials: &Credentials,
        device_id: &str,
        device_name: &str,
        version_string: &str,
    ) -> Result<Welcome, SessionError> {
        let payload =
            credentials::login_payload(credentials, device_id, device_name, version_string);
        self.writer
            .send(Frame::new(PacketType::Login, payload))
            .await?;
        tracing::debug!(username = %credentials.username, "Login sent");

        let frame = match self.reader.next().await {
            Some(frame) => frame?,
            None => {
                return Err(ProtocolError::ConnectionClosed(
                    "connection closed during login".to_string(),
                )
                .into())
            }
        };

        match frame.packet_type() {
            Some(PacketType::ApWelcome) => {
                let welcome = credentials::parse_welcome(&frame.payload)?;
                tracing::info!(username = %welcome.canonical_username, "Authenticated");
                Ok(welcome)
            }
            Some(PacketType::AuthFailure) => {
                let err = credentials::parse_auth_failure(&frame.payload);
                tracing::warn!("Login rejected: {}", err);
                Err(err.into())
            }
            _ => Err(SessionError::UnexpectedPacket(frame.command)),
        }
    }

    /// Sends one frame outside the dispatch loop.
    pub async fn send(&mut self, frame: Frame) -> Result<(), SessionError> {
        self.writer.send(frame).await?;
        Ok(())
    }

    pub fn into_parts(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }
}

/// Runs the client side of the handshake over `stream`.
///
/// After the client response is written, any bytes the server sends within
/// `check_window` are a rejection.
pub async fn handshake<S>(
    mut stream: S,
    config: HandshakeConfig,
    policy: TagPolicy,
    check_window: Duration,
) -> Result<Transport, SessionError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut hs = ClientHandshake::new(config);

    let hello = hs.client_hello()?;
    stream.write_all(&hello).await?;
    stream.flush().await?;
    tracing::debug!(bytes = hello.len(), "Client hello sent");

    let (header, body) = read_message(&mut stream).await?;
    hs.handle_server_response(header, &body)?;
    tracing::debug!("Server challenge verified");

    let response = hs.client_response()?;
    stream.write_all(&response).await?;
    stream.flush().await?;

    if let Some(body) = read_rejection(&mut stream, check_window).await? {
        let err = hs.handle_rejection(&body);
        tracing::warn!("Access point rejected handshake: {}", err);
        return Err(err.into());
    }

    let keys = hs.finish()?;
    tracing::debug!("Handshake established");

    let (encoder, decoder) = keys.into_codecs(policy);
    let (read_half, write_half) = tokio::io::split(stream);
    let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
    let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);

    Ok(Transport {
        reader: FramedRead::new(reader, decoder),
        writer: FramedWrite::new(writer, encoder),
    })
}

/// Reads one length-prefixed handshake message.
async fn read_message<S>(stream: &mut S) -> Result<([u8; LENGTH_FIELD_SIZE], Vec<u8>), SessionError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_FIELD_SIZE];
    stream.read_exact(&mut header).await?;
    let body = read_body(stream, header).await?;
    Ok((header, body))
}

async fn read_body<S>(stream: &mut S, header: [u8; LENGTH_FIELD_SIZE]) -> Result<Vec<u8>, SessionError>
where
    S: AsyncRead + Unpin,
{
    let len = message_body_length(header)?;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

/// Waits up to `window` for the first byte of an unsolicited message.
async fn read_rejection<S>(stream: &mut S, window: Duration) -> Result<Option<Vec<u8>>, SessionError>
where
    S: AsyncRead + Unpin,
{
    let first = match timeout(window, stream.read_u8()).await {
        Err(_) => return Ok(None),
        Ok(result) => result?,
    };

    let mut header = [first, 0, 0, 0];
    stream.read_exact(&mut header[1..]).await?;
    read_body(stream, header).await.map(Some)
}
