//! Scripted access point for integration tests.
//!
//! Speaks the server side of the handshake with a fixed DH key and a
//! signature made by a test RSA key, then exchanges encrypted frames with
//! mirrored session keys.

#![allow(dead_code)]

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use client::{AccessPoint, Credentials, Session, SessionConfig, SessionError};
use futures_util::StreamExt;
use prost::Message;
use protocol::dh::PRIVATE_KEY_LENGTH;
use protocol::handshake::SERVER_KEY_EXPONENT;
use protocol::proto::{
    ApChallenge, ApLoginFailed, ApResponseMessage, ApWelcome, AuthenticationType, ClientHello,
    ClientResponseEncrypted, ClientResponsePlaintext, ErrorCode, Header,
    LoginCryptoChallengeUnion, LoginCryptoDiffieHellmanChallenge,
};
use protocol::{
    ApDecoder, ApEncoder, DhLocalKeys, Frame, KeyMaterial, MercuryPacket, PacketType,
    ServerKey, TagPolicy,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{Encoder, FramedRead};

/// Public value of the fixed server DH key.
pub const SERVER_PUBLIC: &str = "f129f2bb21fb6b12011d910858ac544c0eb9dd6ec267d94fcf33b1d6d9cbe67fcb4ef996777040791b195868637d1dfd24d23a92b7497412e8178ab6564e489d08d9c3cf2c7f671b4c04db3043170b4148550d763453667b505031342ee7ecf2";
/// Modulus of the test signing key.
pub const TEST_MODULUS: &str = "a34648e6e1ba7607d84211cb773d4908352207bd35d163dfb82405b7cf83952051bb74259508ce7adb28813dc3cadc66731106811e6539d41404c5524b1c9d689b9e9f698b2a4d66535f8b108e9d2eac1a713d10c35b4d5d3722b055717fd2d3d43a70479848c1635dae25b43b82d6fda9a09500204bc99811df70092241bfa5";
/// PKCS#1 v1.5 SHA-1 signature of `SERVER_PUBLIC` under the test key.
pub const GS_SIGNATURE: &str = "3c4aa594b9d4c3b798db3ae072c14329ac2d74087e008553f57e3dd095589505739872e45583111ad191c5734edea91507bc167415d84da470f75a65d7312ea37b636f64d10147068c84345ba7651410805600f4464b544c3a2d1a13e8bb877e3da487b151931ddefabeab0b52f05accf0232fc1fd79e048e8f6d63897d112bb";

pub const USERNAME: &str = "alice";
pub const CANONICAL_USERNAME: &str = "alice-canonical";
pub const REUSABLE_BLOB: &[u8] = b"reusable-blob";

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_server_key() -> ServerKey {
    ServerKey::from_modulus(&hex::decode(TEST_MODULUS).unwrap(), SERVER_KEY_EXPONENT).unwrap()
}

fn server_keys() -> DhLocalKeys {
    let private: Vec<u8> = (0..PRIVATE_KEY_LENGTH).map(|i| (i * 13 + 5) as u8).collect();
    DhLocalKeys::from_private_key(&private)
}

pub fn credentials() -> Credentials {
    Credentials::with_password(USERNAME, "secret")
}

/// Binds a loopback listener and a session config pointing at it.
pub async fn bind(policy: TagPolicy) -> (TcpListener, SessionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = SessionConfig {
        access_points: vec![AccessPoint::new("127.0.0.1", port)],
        device_id: "test-device".to_string(),
        device_name: "kitchen-speaker".to_string(),
        tag_policy: policy,
        connect_timeout: Duration::from_secs(5),
        check_window: Duration::from_millis(20),
        audio_key_timeout: Duration::from_secs(2),
        server_key: Some(test_server_key()),
        ..Default::default()
    };
    (listener, config)
}

/// Starts `Session::connect` in the background.
pub fn spawn_connect(config: SessionConfig) -> JoinHandle<Result<Session, SessionError>> {
    tokio::spawn(async move { Session::connect(&config, &credentials()).await })
}

/// Which challenge the access point answers the hello with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    Signed,
    TamperedGs,
}

/// Length-prefixed `APResponseMessage` as the server writes it.
pub fn response_message(message: &ApResponseMessage) -> Vec<u8> {
    let body = message.encode_to_vec();
    let mut out = ((body.len() + 4) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(&body);
    out
}

pub fn challenge_message(challenge: Challenge) -> Vec<u8> {
    let mut gs = hex::decode(SERVER_PUBLIC).unwrap();
    if challenge == Challenge::TamperedGs {
        gs[10] ^= 0x04;
    }
    response_message(&ApResponseMessage {
        challenge: Some(ApChallenge {
            login_crypto_challenge: LoginCryptoChallengeUnion {
                diffie_hellman: Some(LoginCryptoDiffieHellmanChallenge {
                    gs,
                    server_signature_key: 0,
                    gs_signature: hex::decode(GS_SIGNATURE).unwrap(),
                }),
            },
            server_nonce: vec![0x22; 16],
            padding: None,
        }),
        login_failed: None,
    })
}

pub fn login_failed_message(code: ErrorCode, description: &str) -> Vec<u8> {
    response_message(&ApResponseMessage {
        challenge: None,
        login_failed: Some(ApLoginFailed {
            error_code: code as i32,
            error_description: Some(description.to_string()),
            ..Default::default()
        }),
    })
}

/// Reads the client hello, returning the raw packet and its decoded body.
pub async fn read_hello(stream: &mut TcpStream) -> (Vec<u8>, ClientHello) {
    let mut head = [0u8; 6];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(&head[..2], &[0x00, 0x04]);
    let total = u32::from_be_bytes([head[2], head[3], head[4], head[5]]) as usize;

    let mut body = vec![0u8; total - head.len()];
    stream.read_exact(&mut body).await.unwrap();
    let hello = ClientHello::decode(body.as_slice()).unwrap();

    let mut packet = head.to_vec();
    packet.extend_from_slice(&body);
    (packet, hello)
}

/// Reads the length-prefixed client response.
pub async fn read_client_response(stream: &mut TcpStream) -> ClientResponsePlaintext {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    let total = u32::from_be_bytes(head) as usize;
    let mut body = vec![0u8; total - head.len()];
    stream.read_exact(&mut body).await.unwrap();
    ClientResponsePlaintext::decode(body.as_slice()).unwrap()
}

/// The server end of an established connection.
pub struct FakeAccessPoint {
    reader: FramedRead<OwnedReadHalf, ApDecoder>,
    writer: OwnedWriteHalf,
    encoder: ApEncoder,
}

impl FakeAccessPoint {
    /// Runs the server side of a successful handshake on `stream`.
    pub async fn handshake(mut stream: TcpStream, policy: TagPolicy) -> Self {
        let (hello_packet, hello) = read_hello(&mut stream).await;
        let challenge = challenge_message(Challenge::Signed);
        stream.write_all(&challenge).await.unwrap();

        let mut accumulator = hello_packet;
        accumulator.extend_from_slice(&challenge);

        let gc = hello.login_crypto_hello.diffie_hellman.unwrap().gc;
        let shared = server_keys().shared_secret(&gc).unwrap();
        let material = KeyMaterial::derive(&shared, &accumulator).unwrap();

        let response = read_client_response(&mut stream).await;
        assert_eq!(
            response.login_crypto_response.diffie_hellman.unwrap().hmac,
            material.challenge(&accumulator).unwrap().to_vec()
        );

        let (encoder, decoder) = material.session_keys().mirrored().into_codecs(policy);
        let (read, write) = stream.into_split();
        Self {
            reader: FramedRead::new(read, decoder),
            writer: write,
            encoder,
        }
    }

    /// Next frame from the client; panics on EOF or timeout.
    pub async fn recv(&mut self) -> Frame {
        timeout(STEP_TIMEOUT, self.reader.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("client closed the connection")
            .unwrap()
    }

    /// Waits until the client closes its side.
    pub async fn expect_eof(&mut self) {
        loop {
            match timeout(STEP_TIMEOUT, self.reader.next()).await {
                Ok(None) | Ok(Some(Err(_))) => return,
                Ok(Some(Ok(_))) => continue,
                Err(_) => panic!("client did not close the connection"),
            }
        }
    }

    pub async fn send(&mut self, command: impl Into<u8>, payload: impl Into<Bytes>) {
        let mut wire = BytesMut::new();
        self.encoder
            .encode(Frame::new(command, payload), &mut wire)
            .unwrap();
        self.writer.write_all(&wire).await.unwrap();
    }

    /// Sends a frame whose authentication tag has one bit flipped.
    pub async fn send_tampered(&mut self, command: impl Into<u8>, payload: impl Into<Bytes>) {
        let mut wire = BytesMut::new();
        self.encoder
            .encode(Frame::new(command, payload), &mut wire)
            .unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        self.writer.write_all(&wire).await.unwrap();
    }

    pub async fn expect_login(&mut self) -> ClientResponseEncrypted {
        let frame = self.recv().await;
        assert_eq!(frame.packet_type(), Some(PacketType::Login));
        ClientResponseEncrypted::decode(frame.payload).unwrap()
    }

    pub async fn welcome(&mut self) {
        let welcome = ApWelcome {
            canonical_username: CANONICAL_USERNAME.to_string(),
            reusable_auth_credentials_type:
                AuthenticationType::AuthenticationStoredSpotifyCredentials as i32,
            reusable_auth_credentials: REUSABLE_BLOB.to_vec(),
            ..Default::default()
        };
        self.send(PacketType::ApWelcome, welcome.encode_to_vec())
            .await;
    }

    /// Accepts the login and consumes the preferred locale frame.
    pub async fn accept_login(&mut self) -> ClientResponseEncrypted {
        let login = self.expect_login().await;
        self.welcome().await;
        let locale = self.recv().await;
        assert_eq!(locale.packet_type(), Some(PacketType::PreferredLocale));
        login
    }

    /// Next Mercury packet sent by the client.
    pub async fn recv_mercury(&mut self) -> (PacketType, MercuryPacket, Header) {
        let frame = self.recv().await;
        let command = frame.packet_type().unwrap();
        let packet = MercuryPacket::parse(frame.payload).unwrap();
        let header = Header::decode(packet.parts[0].clone()).unwrap();
        (command, packet, header)
    }

    /// Sends one Mercury packet using an 8-byte sequence field.
    pub async fn send_mercury(
        &mut self,
        command: PacketType,
        sequence: u64,
        flags: u8,
        parts: Vec<Bytes>,
    ) {
        self.send(command, mercury_packet(sequence, flags, &parts))
            .await;
    }

    /// Replies to `sequence` with a single final packet.
    pub async fn reply(&mut self, sequence: u64, uri: &str, status: i32, payload: &[&[u8]]) {
        let mut parts = vec![response_header(uri, status)];
        parts.extend(payload.iter().map(|p| Bytes::copy_from_slice(p)));
        self.send_mercury(PacketType::MercuryReq, sequence, 1, parts)
            .await;
    }
}

pub fn mercury_packet(sequence: u64, flags: u8, parts: &[Bytes]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u16(8);
    buf.put_u64(sequence);
    buf.put_u8(flags);
    buf.put_u16(parts.len() as u16);
    for part in parts {
        buf.put_u16(part.len() as u16);
        buf.put_slice(part);
    }
    buf.freeze()
}

pub fn response_header(uri: &str, status: i32) -> Bytes {
    Header {
        uri: Some(uri.to_string()),
        status_code: Some(status),
        ..Default::default()
    }
    .encode_to_vec()
    .into()
}

/// Connects a session to a fresh fake access point and logs in.
pub async fn establish(policy: TagPolicy) -> (Session, FakeAccessPoint) {
    let (listener, config) = bind(policy).await;
    let client = spawn_connect(config);

    let (stream, _) = listener.accept().await.unwrap();
    let mut ap = FakeAccessPoint::handshake(stream, policy).await;
    ap.accept_login().await;

    let session = client.await.unwrap().unwrap();
    (session, ap)
}
