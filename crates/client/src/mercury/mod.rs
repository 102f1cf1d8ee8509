//! Mercury request multiplexing over a session.
//!
//! Every request gets a fresh sequence number and a one-shot waiter that is
//! registered before the frame is written, so a reply can never beat its
//! waiter. The dispatch loop resolves waiters by sequence and fans pushed
//! events out to listeners by URI prefix.

mod reassembly;

pub use reassembly::Reassembler;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use protocol::{MercuryMethod, MercuryRequest, MercuryResponse, PacketType, ProtocolError};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::MercuryError;
use crate::session::PacketSender;

/// Buffered events per listener before new ones are dropped.
const LISTENER_CAPACITY: usize = 64;

/// Stream of pushed events matching a URI prefix.
pub type Subscription = mpsc::Receiver<MercuryResponse>;

type Waiter = oneshot::Sender<Result<MercuryResponse, MercuryError>>;

struct Listener {
    prefix: String,
    tx: mpsc::Sender<MercuryResponse>,
}

struct MercuryInner {
    sender: PacketSender,
    next_sequence: AtomicU64,
    pending: DashMap<u64, Waiter>,
    listeners: RwLock<Vec<Listener>>,
    shutdown: CancellationToken,
}

/// Cloneable handle to a session's Mercury multiplexer.
#[derive(Clone)]
pub struct MercuryManager {
    inner: Arc<MercuryInner>,
}

/// Removes a waiter when its request future finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, Waiter>,
    sequence: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.sequence);
    }
}

impl MercuryManager {
    pub(crate) fn new(sender: PacketSender, shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(MercuryInner {
                sender,
                next_sequence: AtomicU64::new(1),
                pending: DashMap::new(),
                listeners: RwLock::new(Vec::new()),
                shutdown,
            }),
        }
    }

    /// Sends a request and waits for its reply.
    ///
    /// There is no timeout; wrap the call in one if needed. Dropping the
    /// future removes the local waiter but does not retract the request.
    pub async fn request(&self, request: MercuryRequest) -> Result<MercuryResponse, MercuryError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(MercuryError::Closed);
        }

        // Requests carry a 4-byte sequence; past that the counter must not wrap.
        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::Relaxed);
        let wire_sequence =
            u32::try_from(sequence).map_err(|_| MercuryError::SequenceExhausted)?;
        let payload = request.encode(wire_sequence)?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(sequence, tx);
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            sequence,
        };

        // Teardown may have drained the waiters just before the insert.
        if self.inner.shutdown.is_cancelled() {
            return Err(MercuryError::Closed);
        }

        tracing::debug!(
            sequence,
            method = %request.method,
            uri = %request.uri,
            "Sending mercury request"
        );
        self.inner
            .sender
            .send(request.method.command(), payload)
            .await?;

        let response = rx.await.map_err(|_| MercuryError::Closed)??;
        if !response.header().is_success() {
            return Err(MercuryError::Status {
                code: response.status_code(),
                response,
            });
        }
        Ok(response)
    }

    /// `GET` without payload.
    pub async fn get(&self, uri: impl Into<String>) -> Result<MercuryResponse, MercuryError> {
        self.request(MercuryRequest::new(MercuryMethod::Get, uri))
            .await
    }

    /// `SEND` with the given payload parts.
    pub async fn send(
        &self,
        uri: impl Into<String>,
        parts: Vec<Bytes>,
    ) -> Result<MercuryResponse, MercuryError> {
        let mut request = MercuryRequest::new(MercuryMethod::Send, uri);
        request.payload = parts;
        self.request(request).await
    }

    /// Subscribes to `uri` and returns the events pushed under it.
    pub async fn subscribe(&self, uri: impl Into<String>) -> Result<Subscription, MercuryError> {
        let uri = uri.into();
        let subscription = self.listen(uri.clone()).await;
        self.request(MercuryRequest::new(MercuryMethod::Sub, uri))
            .await?;
        Ok(subscription)
    }

    /// Drops local listeners for `uri` and unsubscribes server-side.
    pub async fn unsubscribe(&self, uri: impl Into<String>) -> Result<(), MercuryError> {
        let uri = uri.into();
        self.inner
            .listeners
            .write()
            .await
            .retain(|listener| listener.prefix != uri);
        self.request(MercuryRequest::new(MercuryMethod::Unsub, uri))
            .await?;
        Ok(())
    }

    /// Receives pushed events whose URI starts with `prefix`, without
    /// sending a subscription request.
    pub async fn listen(&self, prefix: impl Into<String>) -> Subscription {
        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        let prefix = prefix.into();
        tracing::debug!(prefix = %prefix, "Registering mercury listener");
        self.inner
            .listeners
            .write()
            .await
            .push(Listener { prefix, tx });
        rx
    }

    /// Number of requests waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Returns true while a caller is waiting for `sequence`.
    pub(crate) fn is_pending(&self, sequence: u64) -> bool {
        self.inner.pending.contains_key(&sequence)
    }

    /// Routes a reassembled message arriving under `command`.
    pub(crate) async fn dispatch(&self, command: PacketType, response: MercuryResponse) {
        match command {
            PacketType::MercuryEvent => self.deliver_event(response).await,
            _ => self.complete(response),
        }
    }

    fn complete(&self, response: MercuryResponse) {
        let sequence = response.sequence();
        match self.inner.pending.remove(&sequence) {
            Some((_, waiter)) => {
                tracing::debug!(
                    sequence,
                    status = response.status_code(),
                    "Mercury response received"
                );
                if waiter.send(Ok(response)).is_err() {
                    tracing::debug!(sequence, "Mercury caller went away");
                }
            }
            None => {
                tracing::debug!(sequence, uri = %response.uri(), "No pending request for mercury response");
            }
        }
    }

    async fn deliver_event(&self, response: MercuryResponse) {
        let mut delivered = false;
        let mut stale = false;
        {
            let listeners = self.inner.listeners.read().await;
            for listener in listeners
                .iter()
                .filter(|listener| response.uri().starts_with(&listener.prefix))
            {
                match listener.tx.try_send(response.clone()) {
                    Ok(()) => delivered = true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            prefix = %listener.prefix,
                            uri = %response.uri(),
                            "Mercury listener is backpressured, dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => stale = true,
                }
            }
        }

        if stale {
            self.inner
                .listeners
                .write()
                .await
                .retain(|listener| !listener.tx.is_closed());
        }

        if !delivered {
            tracing::debug!(uri = %response.uri(), "Unhandled mercury event");
        }
    }

    /// Fails the waiter for `sequence` with a reassembly or parse error.
    pub(crate) fn fail_sequence(&self, sequence: u64, err: ProtocolError) {
        if let Some((_, waiter)) = self.inner.pending.remove(&sequence) {
            let _ = waiter.send(Err(MercuryError::Protocol(err)));
        }
    }

    /// Fails every outstanding request and closes all listeners.
    pub(crate) async fn fail_all(&self) {
        let sequences: Vec<u64> = self
            .inner
            .pending
            .iter()
            .map(|entry| *entry.key())
            .collect();
        if !sequences.is_empty() {
            tracing::debug!(count = sequences.len(), "Failing pending mercury requests");
        }
        for sequence in sequences {
            if let Some((_, waiter)) = self.inner.pending.remove(&sequence) {
                let _ = waiter.send(Err(MercuryError::Closed));
            }
        }
        self.inner.listeners.write().await.clear();
    }
}
