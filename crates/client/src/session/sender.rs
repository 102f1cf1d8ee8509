//! Serialized frame writer shared by every sender on a session.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::SinkExt;
use protocol::{Frame, PacketType};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::connection::FrameWriter;
use crate::error::SessionError;

/// Cloneable handle to the session's send path.
///
/// The writer sits behind a single async mutex: encrypting a frame advances
/// the send cipher, so frames must be encoded and flushed one at a time in
/// the order they take the lock.
#[derive(Clone)]
pub struct PacketSender {
    writer: Arc<Mutex<FrameWriter>>,
    shutdown: CancellationToken,
}

impl PacketSender {
    pub(crate) fn new(writer: FrameWriter, shutdown: CancellationToken) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            shutdown,
        }
    }

    /// Encrypts and writes one frame.
    ///
    /// A fatal write error tears the session down.
    pub async fn send(
        &self,
        command: PacketType,
        payload: impl Into<Bytes>,
    ) -> Result<(), SessionError> {
        if self.shutdown.is_cancelled() {
            return Err(SessionError::Closed);
        }

        let frame = Frame::new(command, payload);
        let mut writer = self.writer.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(SessionError::Closed);
        }

        match writer.send(frame).await {
            Ok(()) => {
                tracing::trace!(command = %command, "Frame sent");
                Ok(())
            }
            Err(e) => {
                if e.is_fatal() {
                    tracing::warn!(command = %command, "Send failed, closing session: {}", e);
                    self.shutdown.cancel();
                }
                Err(e.into())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use protocol::{ApDecoder, ApEncoder, ProtocolError, TagPolicy};
    use tokio::io::{duplex, AsyncWrite};
    use tokio_util::codec::{FramedRead, FramedWrite};

    const KEY: [u8; 32] = [7; 32];

    fn pair() -> (PacketSender, FramedRead<tokio::io::DuplexStream, ApDecoder>, CancellationToken) {
        let (a, b) = duplex(1 << 16);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(a);
        let token = CancellationToken::new();
        let sender = PacketSender::new(
            FramedWrite::new(writer, ApEncoder::new(&KEY)),
            token.clone(),
        );
        let reader = FramedRead::new(b, ApDecoder::new(&KEY, TagPolicy::Enforce));
        (sender, reader, token)
    }

    #[tokio::test]
    async fn test_concurrent_sends_stay_decryptable() {
        let (sender, mut reader, _token) = pair();

        let mut tasks = Vec::new();
        for i in 0..32u8 {
            let sender = sender.clone();
            tasks.push(tokio::spawn(async move {
                sender.send(PacketType::Pong, vec![i; 100]).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..32 {
            let frame = reader.next().await.unwrap().unwrap();
            assert_eq!(frame.packet_type(), Some(PacketType::Pong));
            assert!(frame.payload.iter().all(|b| *b == frame.payload[0]));
            seen.push(frame.payload[0]);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_send_after_shutdown_fails() {
        let (sender, _reader, token) = pair();
        token.cancel();
        assert!(sender.is_closed());
        assert!(matches!(
            sender.send(PacketType::Ping, vec![]).await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_keeps_session_open() {
        let (sender, mut reader, _token) = pair();

        let result = sender
            .send(PacketType::MercuryReq, vec![0u8; 70_000])
            .await;
        assert!(matches!(
            result,
            Err(SessionError::Protocol(ProtocolError::FrameTooLarge { .. }))
        ));
        assert!(!sender.is_closed());

        sender.send(PacketType::Ping, vec![1]).await.unwrap();
        let frame = reader.next().await.unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), &[1]);
    }

    #[tokio::test]
    async fn test_broken_pipe_closes_session() {
        let (sender, reader, _token) = pair();
        drop(reader);

        let result = sender.send(PacketType::Ping, vec![1]).await;
        assert!(result.is_err());
        assert!(sender.is_closed());
    }
}
