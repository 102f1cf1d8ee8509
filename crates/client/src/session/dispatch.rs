//! The background loop that owns the receive side of a session.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use protocol::{Frame, MercuryPacket, PacketType};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::PacketSender;
use crate::audio_key::AudioKeyManager;
use crate::connection::FrameReader;
use crate::mercury::{MercuryManager, Reassembler};

pub(crate) struct Dispatcher {
    pub(crate) reader: FrameReader,
    pub(crate) sender: PacketSender,
    pub(crate) mercury: MercuryManager,
    pub(crate) audio_keys: AudioKeyManager,
    pub(crate) country_code: Arc<RwLock<Option<String>>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) terminated: CancellationToken,
}

impl Dispatcher {
    /// Reads and routes frames until the connection fails or the session
    /// is closed, then fails everything still waiting.
    pub(crate) async fn run(mut self) {
        let mut reassembler = Reassembler::new();

        let reason = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break "session closed".to_string(),
                next = self.reader.next() => match next {
                    Some(Ok(frame)) => self.dispatch(frame, &mut reassembler).await,
                    Some(Err(e)) => {
                        tracing::warn!("Receive failed: {}", e);
                        break e.to_string();
                    }
                    None => break "connection closed by peer".to_string(),
                },
            }
        };

        tracing::info!(reason = %reason, "Dispatch loop stopped");
        self.shutdown.cancel();
        self.mercury.fail_all().await;
        self.audio_keys.fail_all();
        self.terminated.cancel();
    }

    async fn dispatch(&mut self, frame: Frame, reassembler: &mut Reassembler) {
        let Some(command) = frame.packet_type() else {
            tracing::debug!(
                command = format_args!("{:#04x}", frame.command),
                len = frame.payload.len(),
                "Skipping unknown command"
            );
            return;
        };

        match command {
            PacketType::Ping => {
                tracing::trace!("Ping received");
                // A stalled writer must not hold up inbound routing.
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    if let Err(e) = sender.send(PacketType::Pong, frame.payload).await {
                        tracing::warn!("Failed to answer ping: {}", e);
                    }
                });
            }
            PacketType::PongAck => {}
            PacketType::CountryCode => {
                let code = String::from_utf8_lossy(&frame.payload).into_owned();
                tracing::debug!(country = %code, "Country code received");
                *self.country_code.write().await = Some(code);
            }
            PacketType::MercuryReq
            | PacketType::MercurySub
            | PacketType::MercuryUnsub
            | PacketType::MercuryEvent => {
                self.handle_mercury(command, frame.payload, reassembler)
                    .await
            }
            PacketType::AesKey | PacketType::AesKeyError => {
                self.audio_keys.dispatch(command, frame.payload)
            }
            other => {
                tracing::debug!(command = %other, len = frame.payload.len(), "Ignoring command");
            }
        }
    }

    async fn handle_mercury(
        &mut self,
        command: PacketType,
        payload: Bytes,
        reassembler: &mut Reassembler,
    ) {
        let packet = match MercuryPacket::parse(payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(command = %command, "Dropping malformed mercury packet: {}", e);
                return;
            }
        };

        let sequence = packet.sequence;
        tracing::trace!(
            command = %command,
            sequence,
            flags = packet.flags,
            parts = packet.parts.len(),
            "Mercury packet"
        );

        // Replies are buffered only while their caller still waits.
        if command != PacketType::MercuryEvent && !self.mercury.is_pending(sequence) {
            reassembler.discard(sequence);
            tracing::debug!(sequence, "Dropping mercury reply without a waiter");
            return;
        }

        match reassembler.push(packet) {
            None => {}
            Some(Ok(response)) => self.mercury.dispatch(command, response).await,
            Some(Err(e)) => {
                tracing::warn!(sequence, "Failed to assemble mercury message: {}", e);
                self.mercury.fail_sequence(sequence, e);
            }
        }
    }
}
