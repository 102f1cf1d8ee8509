//! Authenticated access point sessions.
//!
//! A session owns one TCP connection. Writes go through [`PacketSender`],
//! which serializes frames behind a lock; reads belong exclusively to a
//! background dispatch loop that answers pings, records the country code,
//! and hands Mercury and audio key replies to their managers.
//!
//! When the loop ends, for any reason, every pending Mercury request and
//! audio key request fails with a closed error and further calls fail fast.

mod dispatch;
mod sender;

pub use sender::PacketSender;

use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use protocol::{Frame, PacketType, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::audio_key::AudioKeyManager;
use crate::config::SessionConfig;
use crate::connection;
use crate::credentials::{random_device_id, Credentials};
use crate::endpoint::{self, AccessPoint};
use crate::error::SessionError;
use crate::mercury::MercuryManager;
use dispatch::Dispatcher;

const PREFERRED_LOCALE_PREFIX: [u8; 5] = [0x00, 0x00, 0x10, 0x00, 0x02];
const PREFERRED_LOCALE_KEY: &[u8] = b"preferred-locale";

struct SessionInner {
    sender: PacketSender,
    mercury: MercuryManager,
    audio_keys: AudioKeyManager,
    username: String,
    reusable_credentials: Credentials,
    device_id: String,
    access_point: Option<AccessPoint>,
    country_code: Arc<RwLock<Option<String>>>,
    shutdown: CancellationToken,
    terminated: CancellationToken,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Cloneable handle to an authenticated session.
///
/// The session is torn down when [`Session::close`] is called, when the
/// connection fails, or when the last handle is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Connects to the first reachable configured access point, performs
    /// the handshake and logs in.
    pub async fn connect(
        config: &SessionConfig,
        credentials: &Credentials,
    ) -> Result<Session, SessionError> {
        let (stream, access_point) =
            endpoint::connect_first(&config.access_points, config.connect_timeout).await?;
        Self::establish(stream, Some(access_point), config, credentials).await
    }

    /// Runs the handshake and login over an already connected stream.
    pub async fn connect_with_stream<S>(
        stream: S,
        config: &SessionConfig,
        credentials: &Credentials,
    ) -> Result<Session, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::establish(stream, None, config, credentials).await
    }

    async fn establish<S>(
        stream: S,
        access_point: Option<AccessPoint>,
        config: &SessionConfig,
        credentials: &Credentials,
    ) -> Result<Session, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let handshake_config = config.handshake_config()?;
        let device_id = if config.device_id.is_empty() {
            random_device_id()
        } else {
            config.device_id.clone()
        };

        let setup = async {
            let mut transport = connection::handshake(
                stream,
                handshake_config,
                config.tag_policy,
                config.check_window,
            )
            .await?;
            let welcome = transport
                .authenticate(
                    credentials,
                    &device_id,
                    &config.device_name,
                    &config.version_string,
                )
                .await?;
            transport
                .send(Frame::new(
                    PacketType::PreferredLocale,
                    preferred_locale_payload(&config.locale),
                ))
                .await?;
            Ok::<_, SessionError>((transport, welcome))
        };

        let limit = config.connect_timeout + config.check_window;
        let (transport, welcome) = timeout(limit, setup).await.map_err(|_| {
            SessionError::Protocol(ProtocolError::Timeout(format!(
                "handshake and login did not complete within {:?}",
                limit
            )))
        })??;

        let shutdown = CancellationToken::new();
        let terminated = CancellationToken::new();
        let (reader, writer) = transport.into_parts();
        let sender = PacketSender::new(writer, shutdown.clone());
        let mercury = MercuryManager::new(sender.clone(), shutdown.clone());
        let audio_keys =
            AudioKeyManager::new(sender.clone(), config.audio_key_timeout, shutdown.clone());
        let country_code = Arc::new(RwLock::new(None));

        tokio::spawn(
            Dispatcher {
                reader,
                sender: sender.clone(),
                mercury: mercury.clone(),
                audio_keys: audio_keys.clone(),
                country_code: country_code.clone(),
                shutdown: shutdown.clone(),
                terminated: terminated.clone(),
            }
            .run(),
        );

        tracing::info!(
            username = %welcome.canonical_username,
            device_id = %device_id,
            "Session established"
        );

        Ok(Session {
            inner: Arc::new(SessionInner {
                sender,
                mercury,
                audio_keys,
                username: welcome.canonical_username,
                reusable_credentials: welcome.reusable_credentials,
                device_id,
                access_point,
                country_code,
                shutdown,
                terminated,
            }),
        })
    }

    /// The Mercury multiplexer of this session.
    pub fn mercury(&self) -> &MercuryManager {
        &self.inner.mercury
    }

    pub fn audio_keys(&self) -> &AudioKeyManager {
        &self.inner.audio_keys
    }

    /// Sends a raw frame.
    pub async fn send(
        &self,
        command: PacketType,
        payload: impl Into<Bytes>,
    ) -> Result<(), SessionError> {
        self.inner.sender.send(command, payload).await
    }

    /// Canonical username reported by the server.
    pub fn username(&self) -> &str {
        &self.inner.username
    }

    /// Credentials that can log in again without the password.
    pub fn reusable_credentials(&self) -> &Credentials {
        &self.inner.reusable_credentials
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// The access point in use, when connected through [`Session::connect`].
    pub fn access_point(&self) -> Option<&AccessPoint> {
        self.inner.access_point.as_ref()
    }

    /// Country code pushed by the server, once received.
    pub async fn country_code(&self) -> Option<String> {
        self.inner.country_code.read().await.clone()
    }

    /// Tears the session down and waits until pending calls have failed.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.terminated.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolves once the session has been torn down.
    pub async fn closed(&self) {
        self.inner.terminated.cancelled().await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.inner.username)
            .field("device_id", &self.inner.device_id)
            .field("access_point", &self.inner.access_point)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn preferred_locale_payload(locale: &str) -> Bytes {
    let mut payload = BytesMut::with_capacity(
        PREFERRED_LOCALE_PREFIX.len() + PREFERRED_LOCALE_KEY.len() + locale.len(),
    );
    payload.put_slice(&PREFERRED_LOCALE_PREFIX);
    payload.put_slice(PREFERRED_LOCALE_KEY);
    payload.put_slice(locale.as_bytes());
    payload.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_locale_payload() {
        let payload = preferred_locale_payload("en");
        assert_eq!(&payload[..5], &[0x00, 0x00, 0x10, 0x00, 0x02]);
        assert_eq!(&payload[5..21], b"preferred-locale");
        assert_eq!(&payload[21..], b"en");
    }
}
