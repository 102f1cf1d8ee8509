//! Audio key requests.
//!
//! `RequestKey` payload: `file_id (20) | track_id (16) | seq (u32 BE) | 00 00`.
//! Replies carry the same sequence: `AesKey` is `seq | key (16)`,
//! `AesKeyError` is `seq | code (u16 BE)`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use protocol::PacketType;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::AudioKeyError;
use crate::session::PacketSender;

pub const TRACK_ID_LENGTH: usize = 16;
pub const FILE_ID_LENGTH: usize = 20;
pub const AUDIO_KEY_LENGTH: usize = 16;

/// A decryption key for one audio file.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AudioKey(pub [u8; AUDIO_KEY_LENGTH]);

impl std::fmt::Debug for AudioKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AudioKey(..)")
    }
}

type Waiter = oneshot::Sender<Result<AudioKey, AudioKeyError>>;

struct PendingGuard<'a> {
    pending: &'a DashMap<u32, Waiter>,
    sequence: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.sequence);
    }
}

struct AudioKeyInner {
    sender: PacketSender,
    next_sequence: AtomicU32,
    pending: DashMap<u32, Waiter>,
    timeout: Duration,
    shutdown: CancellationToken,
}

/// Cloneable handle for requesting audio keys on a session.
#[derive(Clone)]
pub struct AudioKeyManager {
    inner: Arc<AudioKeyInner>,
}

impl AudioKeyManager {
    pub(crate) fn new(sender: PacketSender, timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(AudioKeyInner {
                sender,
                next_sequence: AtomicU32::new(0),
                pending: DashMap::new(),
                timeout,
                shutdown,
            }),
        }
    }

    /// Requests the key for `file_id` of `track_id`, bounded by the
    /// configured timeout.
    pub async fn request(
        &self,
        track_id: [u8; TRACK_ID_LENGTH],
        file_id: [u8; FILE_ID_LENGTH],
    ) -> Result<AudioKey, AudioKeyError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(AudioKeyError::Closed);
        }

        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(sequence, tx);
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            sequence,
        };

        if self.inner.shutdown.is_cancelled() {
            return Err(AudioKeyError::Closed);
        }

        let mut payload = BytesMut::with_capacity(FILE_ID_LENGTH + TRACK_ID_LENGTH + 6);
        payload.put_slice(&file_id);
        payload.put_slice(&track_id);
        payload.put_u32(sequence);
        payload.put_u16(0);

        tracing::debug!(sequence, "Requesting audio key");
        self.inner
            .sender
            .send(PacketType::RequestKey, payload.freeze())
            .await?;

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AudioKeyError::Closed),
            Err(_) => {
                tracing::warn!(sequence, "Audio key request timed out");
                Err(AudioKeyError::Timeout)
            }
        }
    }

    /// Routes an `AesKey` or `AesKeyError` frame to its waiter.
    pub(crate) fn dispatch(&self, command: PacketType, mut payload: Bytes) {
        if payload.remaining() < 4 {
            tracing::warn!(command = %command, "Audio key reply too short");
            return;
        }
        let sequence = payload.get_u32();

        let result = match command {
            PacketType::AesKey if payload.remaining() >= AUDIO_KEY_LENGTH => {
                let mut key = [0u8; AUDIO_KEY_LENGTH];
                payload.copy_to_slice(&mut key);
                Ok(AudioKey(key))
            }
            PacketType::AesKeyError if payload.remaining() >= 2 => Err(AudioKeyError::Rejected {
                code: payload.get_u16(),
            }),
            _ => Err(AudioKeyError::Malformed(format!(
                "{} reply with {} byte body",
                command,
                payload.remaining()
            ))),
        };

        match self.inner.pending.remove(&sequence) {
            Some((_, waiter)) => {
                let _ = waiter.send(result);
            }
            None => tracing::debug!(sequence, "No pending audio key request"),
        }
    }

    /// Fails every outstanding request.
    pub(crate) fn fail_all(&self) {
        let sequences: Vec<u32> = self.inner.pending.iter().map(|e| *e.key()).collect();
        for sequence in sequences {
            if let Some((_, waiter)) = self.inner.pending.remove(&sequence) {
                let _ = waiter.send(Err(AudioKeyError::Closed));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use protocol::{ApDecoder, ApEncoder, Frame, TagPolicy};
    use tokio::io::{duplex, AsyncWrite, DuplexStream};
    use tokio_util::codec::{FramedRead, FramedWrite};

    const KEY: [u8; 32] = [9; 32];

    fn harness(timeout: Duration) -> (AudioKeyManager, FramedRead<DuplexStream, ApDecoder>) {
        let (a, b) = duplex(1 << 16);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(a);
        let shutdown = CancellationToken::new();
        let sender = PacketSender::new(
            FramedWrite::new(writer, ApEncoder::new(&KEY)),
            shutdown.clone(),
        );
        (
            AudioKeyManager::new(sender, timeout, shutdown),
            FramedRead::new(b, ApDecoder::new(&KEY, TagPolicy::Enforce)),
        )
    }

    async fn next_request(wire: &mut FramedRead<DuplexStream, ApDecoder>) -> Frame {
        wire.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_request_layout_and_reply() {
        let (manager, mut wire) = harness(Duration::from_secs(5));

        let m = manager.clone();
        let call = tokio::spawn(async move { m.request([0x11; 16], [0x22; 20]).await });

        let frame = next_request(&mut wire).await;
        assert_eq!(frame.packet_type(), Some(PacketType::RequestKey));
        assert_eq!(frame.payload.len(), 42);
        assert_eq!(&frame.payload[..20], &[0x22; 20]);
        assert_eq!(&frame.payload[20..36], &[0x11; 16]);
        assert_eq!(&frame.payload[36..40], &[0, 0, 0, 0]);
        assert_eq!(&frame.payload[40..], &[0, 0]);

        let mut reply = vec![0, 0, 0, 0];
        reply.extend_from_slice(&[0xab; 16]);
        manager.dispatch(PacketType::AesKey, Bytes::from(reply));

        assert_eq!(call.await.unwrap().unwrap(), AudioKey([0xab; 16]));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_key_error_reply() {
        let (manager, mut wire) = harness(Duration::from_secs(5));

        let m = manager.clone();
        let call = tokio::spawn(async move { m.request([0; 16], [0; 20]).await });
        next_request(&mut wire).await;

        manager.dispatch(PacketType::AesKeyError, Bytes::from_static(&[0, 0, 0, 0, 0, 1]));
        assert!(matches!(
            call.await.unwrap(),
            Err(AudioKeyError::Rejected { code: 1 })
        ));
    }

    #[tokio::test]
    async fn test_timeout_removes_waiter() {
        let (manager, mut wire) = harness(Duration::from_millis(30));

        let m = manager.clone();
        let call = tokio::spawn(async move { m.request([0; 16], [0; 20]).await });
        next_request(&mut wire).await;

        assert!(matches!(call.await.unwrap(), Err(AudioKeyError::Timeout)));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let (manager, mut wire) = harness(Duration::from_secs(5));

        let m = manager.clone();
        let call = tokio::spawn(async move { m.request([0; 16], [0; 20]).await });
        next_request(&mut wire).await;

        manager.fail_all();
        assert!(matches!(call.await.unwrap(), Err(AudioKeyError::Closed)));
    }

    #[tokio::test]
    async fn test_short_reply_ignored() {
        let (manager, _wire) = harness(Duration::from_secs(5));
        manager.dispatch(PacketType::AesKey, Bytes::from_static(&[0, 1]));
        assert_eq!(manager.pending_count(), 0);
    }
}
