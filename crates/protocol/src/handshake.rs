//! Client side of the unencrypted access point handshake.
//!
//! [`ClientHandshake`] is a sans-io state machine: it produces the bytes to
//! write and consumes the bytes read, leaving the socket to the caller.
//!
//! ## Exchange
//! ```text
//! -> 00 04 | len32 | ClientHello            (Idle -> HelloSent)
//! <- len32 | APResponseMessage              (HelloSent -> ChallengeReceived)
//! -> len32 | ClientResponsePlaintext        (ChallengeReceived -> ResponseSent)
//! <- nothing within the check window        (ResponseSent -> Established)
//! ```
//!
//! Every byte written and read up to the server response feeds the
//! accumulator that keys the challenge and the session keys.

use std::fmt;

use hmac::{Hmac, Mac};
use prost::Message;
use rand::RngCore;
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::dh::DhLocalKeys;
use crate::error::{ProtocolError, Result};
use crate::framing::{ApDecoder, ApEncoder, TagPolicy};
use crate::proto::{
    ApLoginFailed, ApResponseMessage, BuildInfo, ClientHello, ClientResponsePlaintext,
    CryptoResponseUnion, Cryptosuite, LoginCryptoDiffieHellmanHello,
    LoginCryptoDiffieHellmanResponse, LoginCryptoHelloUnion, LoginCryptoResponseUnion, Platform,
    PowResponseUnion, Product, ProductFlags,
};

type HmacSha1 = Hmac<Sha1>;

/// Version prefix written before the client hello.
pub const HELLO_PREFIX: [u8; 2] = [0x00, 0x04];

/// Size of the big-endian length field on handshake messages.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Largest server handshake message accepted.
pub const MAX_HANDSHAKE_MESSAGE_SIZE: usize = 64 * 1024;

/// Length of the random client nonce in the hello.
pub const CLIENT_NONCE_LENGTH: usize = 16;

/// Length of the derived key material block.
pub const KEY_MATERIAL_LENGTH: usize = 100;

/// Length of each direction's cipher key.
pub const SESSION_KEY_LENGTH: usize = 32;

/// Build version announced in the hello.
pub const DEFAULT_BUILD_VERSION: u64 = 112_800_721;

/// Public exponent of the server signing key.
pub const SERVER_KEY_EXPONENT: u32 = 65537;

/// Modulus of the production server signing key.
pub const SERVER_KEY_MODULUS: [u8; 256] = [
    0xac, 0xe0, 0x46, 0x0b, 0xff, 0xc2, 0x30, 0xaf, 0xf4, 0x6b, 0xfe, 0xc3, 0xbf, 0xbf, 0x86, 0x3d,
    0xa1, 0x91, 0xc6, 0xcc, 0x33, 0x6c, 0x93, 0xa1, 0x4f, 0xb3, 0xb0, 0x16, 0x12, 0xac, 0xac, 0x6a,
    0xf1, 0x80, 0xe7, 0xf6, 0x14, 0xd9, 0x42, 0x9d, 0xbe, 0x2e, 0x34, 0x66, 0x43, 0xe3, 0x62, 0xd2,
    0x32, 0x7a, 0x1a, 0x0d, 0x92, 0x3b, 0xae, 0xdd, 0x14, 0x02, 0xb1, 0x81, 0x55, 0x05, 0x61, 0x04,
    0xd5, 0x2c, 0x96, 0xa4, 0x4c, 0x1e, 0xcc, 0x02, 0x4a, 0xd4, 0xb2, 0x0c, 0x00, 0x1f, 0x17, 0xed,
    0xc2, 0x2f, 0xc4, 0x35, 0x21, 0xc8, 0xf0, 0xcb, 0xae, 0xd2, 0xad, 0xd7, 0x2b, 0x0f, 0x9d, 0xb3,
    0xc5, 0x32, 0x1a, 0x2a, 0xfe, 0x59, 0xf3, 0x5a, 0x0d, 0xac, 0x68, 0xf1, 0xfa, 0x62, 0x1e, 0xfb,
    0x2c, 0x8d, 0x0c, 0xb7, 0x39, 0x2d, 0x92, 0x47, 0xe3, 0xd7, 0x35, 0x1a, 0x6d, 0xbd, 0x24, 0xc2,
    0xae, 0x25, 0x5b, 0x88, 0xff, 0xab, 0x73, 0x29, 0x8a, 0x0b, 0xcc, 0xcd, 0x0c, 0x58, 0x67, 0x31,
    0x89, 0xe8, 0xbd, 0x34, 0x80, 0x78, 0x4a, 0x5f, 0xc9, 0x6b, 0x89, 0x9d, 0x95, 0x6b, 0xfc, 0x86,
    0xd7, 0x4f, 0x33, 0xa6, 0x78, 0x17, 0x96, 0xc9, 0xc3, 0x2d, 0x0d, 0x32, 0xa5, 0xab, 0xcd, 0x05,
    0x27, 0xe2, 0xf7, 0x10, 0xa3, 0x96, 0x13, 0xc4, 0x2f, 0x99, 0xc0, 0x27, 0xbf, 0xed, 0x04, 0x9c,
    0x3c, 0x27, 0x58, 0x04, 0xb6, 0xb2, 0x19, 0xf9, 0xc1, 0x2f, 0x02, 0xe9, 0x48, 0x63, 0xec, 0xa1,
    0xb6, 0x42, 0xa0, 0x9d, 0x48, 0x25, 0xf8, 0xb3, 0x9d, 0xd0, 0xe8, 0x6a, 0xf9, 0x48, 0x4d, 0xa1,
    0xc2, 0xba, 0x86, 0x30, 0x42, 0xea, 0x9d, 0xb3, 0x08, 0x6c, 0x19, 0x0e, 0x48, 0xb3, 0x9d, 0x66,
    0xeb, 0x00, 0x06, 0xa2, 0x5a, 0xee, 0xa1, 0x1b, 0x13, 0x87, 0x3c, 0xd7, 0x19, 0xe6, 0x55, 0xbd,
];

/// RSA key that signs the server's Diffie-Hellman value.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerKey {
    key: RsaPublicKey,
}

impl ServerKey {
    /// The production access point key.
    pub fn production() -> Result<Self> {
        Self::from_modulus(&SERVER_KEY_MODULUS, SERVER_KEY_EXPONENT)
    }

    /// Builds a key from a big-endian modulus and a public exponent.
    pub fn from_modulus(modulus: &[u8], exponent: u32) -> Result<Self> {
        let key = RsaPublicKey::new(
            BigUint::from_bytes_be(modulus),
            BigUint::from(exponent),
        )
        .map_err(|e| ProtocolError::InvalidPublicKey(format!("server signing key: {}", e)))?;
        Ok(Self { key })
    }

    /// Verifies a PKCS#1 v1.5 RSA-SHA1 signature over `gs`.
    pub fn verify(&self, gs: &[u8], signature: &[u8]) -> Result<()> {
        let hashed = Sha1::digest(gs);
        self.key
            .verify(Pkcs1v15Sign::new::<Sha1>(), &hashed, signature)
            .map_err(|_| {
                ProtocolError::HandshakeIntegrity(
                    "server signature over Diffie-Hellman value did not verify".to_string(),
                )
            })
    }
}

/// Build metadata and trust anchor used for a handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeConfig {
    /// Platform announced in the hello.
    pub platform: Platform,
    /// Build version announced in the hello.
    pub version: u64,
    /// Key expected to sign the server's Diffie-Hellman value.
    pub server_key: ServerKey,
}

impl HandshakeConfig {
    /// Defaults with the production server key.
    pub fn production() -> Result<Self> {
        Ok(Self {
            platform: Platform::Win32X86,
            version: DEFAULT_BUILD_VERSION,
            server_key: ServerKey::production()?,
        })
    }

    /// Defaults with a caller-supplied server key.
    pub fn with_server_key(server_key: ServerKey) -> Self {
        Self {
            platform: Platform::Win32X86,
            version: DEFAULT_BUILD_VERSION,
            server_key,
        }
    }
}

/// The 100-byte block derived from the shared secret and the accumulator.
#[derive(Clone)]
pub struct KeyMaterial {
    block: [u8; KEY_MATERIAL_LENGTH],
}

impl KeyMaterial {
    /// Five rounds of HMAC-SHA1 keyed by `shared_secret` over
    /// `accumulator || i` for `i` in `1..=5`.
    pub fn derive(shared_secret: &[u8], accumulator: &[u8]) -> Result<Self> {
        let mut block = [0u8; KEY_MATERIAL_LENGTH];
        for (i, chunk) in block.chunks_exact_mut(20).enumerate() {
            let mut mac = new_hmac(shared_secret)?;
            mac.update(accumulator);
            mac.update(&[(i + 1) as u8]);
            chunk.copy_from_slice(&mac.finalize().into_bytes());
        }
        Ok(Self { block })
    }

    /// HMAC-SHA1 over the accumulator keyed by the first 20 bytes.
    pub fn challenge(&self, accumulator: &[u8]) -> Result<[u8; 20]> {
        let mut mac = new_hmac(&self.block[..20])?;
        mac.update(accumulator);
        let mut out = [0u8; 20];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    /// The raw block.
    pub fn as_bytes(&self) -> &[u8; KEY_MATERIAL_LENGTH] {
        &self.block
    }

    /// Send and receive keys, bytes `[20, 52)` and `[52, 84)`.
    pub fn session_keys(&self) -> SessionKeys {
        let mut send_key = [0u8; SESSION_KEY_LENGTH];
        let mut receive_key = [0u8; SESSION_KEY_LENGTH];
        send_key.copy_from_slice(&self.block[20..52]);
        receive_key.copy_from_slice(&self.block[52..84]);
        SessionKeys {
            send_key,
            receive_key,
        }
    }
}

fn new_hmac(key: &[u8]) -> Result<HmacSha1> {
    HmacSha1::new_from_slice(key)
        .map_err(|e| ProtocolError::HandshakeFailed(format!("invalid hmac key: {}", e)))
}

/// Per-direction cipher keys of an established session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub send_key: [u8; SESSION_KEY_LENGTH],
    pub receive_key: [u8; SESSION_KEY_LENGTH],
}

impl SessionKeys {
    /// Keys fresh encoder and decoder instances, frame counters at zero.
    pub fn into_codecs(self, policy: TagPolicy) -> (ApEncoder, ApDecoder) {
        (
            ApEncoder::new(&self.send_key),
            ApDecoder::new(&self.receive_key, policy),
        )
    }

    /// The same keys seen from the server's side of the connection.
    pub fn mirrored(&self) -> SessionKeys {
        SessionKeys {
            send_key: self.receive_key,
            receive_key: self.send_key,
        }
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys { .. }")
    }
}

/// State of the handshake process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Nothing sent yet.
    Idle,
    /// Hello written, waiting for the server challenge.
    HelloSent,
    /// Challenge verified, client response not yet written.
    ChallengeReceived,
    /// Response written, waiting out the check window.
    ResponseSent,
    /// Keys are ready.
    Established,
    /// Terminal failure; the connection must be dropped.
    Failed,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Parses a 4-byte handshake length field and returns the body length.
pub fn message_body_length(header: [u8; LENGTH_FIELD_SIZE]) -> Result<usize> {
    let total = u32::from_be_bytes(header) as usize;
    if total < LENGTH_FIELD_SIZE {
        return Err(ProtocolError::HandshakeFailed(format!(
            "server message length {} is shorter than its length field",
            total
        )));
    }
    if total > MAX_HANDSHAKE_MESSAGE_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: total,
            max: MAX_HANDSHAKE_MESSAGE_SIZE,
        });
    }
    Ok(total - LENGTH_FIELD_SIZE)
}

/// Maps an `APLoginFailed` body to an authentication error.
pub fn login_failed_error(failed: &ApLoginFailed) -> ProtocolError {
    ProtocolError::AuthenticationFailed {
        code: failed.error_code,
        reason: failed.reason(),
    }
}

/// Client handshake state machine.
pub struct ClientHandshake {
    phase: HandshakePhase,
    config: HandshakeConfig,
    keys: DhLocalKeys,
    client_nonce: [u8; CLIENT_NONCE_LENGTH],
    accumulator: Vec<u8>,
    challenge: Option<[u8; 20]>,
    session_keys: Option<SessionKeys>,
}

impl ClientHandshake {
    /// Starts a handshake with a fresh keypair and nonce.
    pub fn new(config: HandshakeConfig) -> Self {
        let mut client_nonce = [0u8; CLIENT_NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut client_nonce);
        Self::with_keys(config, DhLocalKeys::random(), client_nonce)
    }

    /// Starts a handshake with caller-provided key material.
    pub fn with_keys(
        config: HandshakeConfig,
        keys: DhLocalKeys,
        client_nonce: [u8; CLIENT_NONCE_LENGTH],
    ) -> Self {
        Self {
            phase: HandshakePhase::Idle,
            config,
            keys,
            client_nonce,
            accumulator: Vec::with_capacity(512),
            challenge: None,
            session_keys: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Bytes accumulated so far.
    pub fn accumulator(&self) -> &[u8] {
        &self.accumulator
    }

    fn expect_phase(&self, expected: HandshakePhase, operation: &str) -> Result<()> {
        if self.phase != expected {
            return Err(ProtocolError::HandshakeFailed(format!(
                "cannot {} in phase {} (expected {})",
                operation, self.phase, expected
            )));
        }
        Ok(())
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        self.phase = HandshakePhase::Failed;
        self.accumulator.clear();
        self.session_keys = None;
        err
    }

    /// Builds the hello message and its wire framing.
    pub fn client_hello(&mut self) -> Result<Vec<u8>> {
        self.expect_phase(HandshakePhase::Idle, "write client hello")?;

        let hello = ClientHello {
            build_info: BuildInfo {
                product: Product::Client as i32,
                product_flags: vec![ProductFlags::ProductFlagNone as i32],
                platform: self.config.platform as i32,
                version: self.config.version,
            },
            cryptosuites_supported: vec![Cryptosuite::Shannon as i32],
            login_crypto_hello: LoginCryptoHelloUnion {
                diffie_hellman: Some(LoginCryptoDiffieHellmanHello {
                    gc: self.keys.public_key(),
                    server_keys_known: 1,
                }),
            },
            client_nonce: self.client_nonce.to_vec(),
            padding: Some(vec![0x1e]),
        };

        let body = hello.encode_to_vec();
        let total = HELLO_PREFIX.len() + LENGTH_FIELD_SIZE + body.len();

        let mut packet = Vec::with_capacity(total);
        packet.extend_from_slice(&HELLO_PREFIX);
        packet.extend_from_slice(&(total as u32).to_be_bytes());
        packet.extend_from_slice(&body);

        self.accumulator.extend_from_slice(&packet);
        self.phase = HandshakePhase::HelloSent;
        Ok(packet)
    }

    /// Consumes the server's response: the 4-byte length field and the body.
    ///
    /// Verifies the signature over `gs`, computes the shared secret and
    /// derives the key material.
    pub fn handle_server_response(
        &mut self,
        header: [u8; LENGTH_FIELD_SIZE],
        body: &[u8],
    ) -> Result<()> {
        self.expect_phase(HandshakePhase::HelloSent, "read server response")?;

        self.accumulator.extend_from_slice(&header);
        self.accumulator.extend_from_slice(body);

        let response = match ApResponseMessage::decode(body) {
            Ok(response) => response,
            Err(e) => return Err(self.fail(e.into())),
        };

        if let Some(failed) = response.login_failed.as_ref() {
            return Err(self.fail(login_failed_error(failed)));
        }

        let Some(dh) = response
            .challenge
            .and_then(|c| c.login_crypto_challenge.diffie_hellman)
        else {
            return Err(self.fail(ProtocolError::HandshakeFailed(
                "server response carries no Diffie-Hellman challenge".to_string(),
            )));
        };

        if let Err(e) = self.config.server_key.verify(&dh.gs, &dh.gs_signature) {
            return Err(self.fail(e));
        }

        let derived = self
            .keys
            .shared_secret(&dh.gs)
            .and_then(|shared| KeyMaterial::derive(&shared, &self.accumulator))
            .and_then(|material| {
                let challenge = material.challenge(&self.accumulator)?;
                Ok((challenge, material.session_keys()))
            });

        match derived {
            Ok((challenge, keys)) => {
                self.challenge = Some(challenge);
                self.session_keys = Some(keys);
                self.phase = HandshakePhase::ChallengeReceived;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Builds the length-prefixed client response carrying the challenge MAC.
    pub fn client_response(&mut self) -> Result<Vec<u8>> {
        self.expect_phase(HandshakePhase::ChallengeReceived, "write client response")?;
        let challenge = self.challenge.ok_or(ProtocolError::HandshakeIncomplete)?;

        let response = ClientResponsePlaintext {
            login_crypto_response: LoginCryptoResponseUnion {
                diffie_hellman: Some(LoginCryptoDiffieHellmanResponse {
                    hmac: challenge.to_vec(),
                }),
            },
            pow_response: PowResponseUnion {},
            crypto_response: CryptoResponseUnion {},
        };

        let body = response.encode_to_vec();
        let mut packet = Vec::with_capacity(LENGTH_FIELD_SIZE + body.len());
        packet.extend_from_slice(&((LENGTH_FIELD_SIZE + body.len()) as u32).to_be_bytes());
        packet.extend_from_slice(&body);

        self.phase = HandshakePhase::ResponseSent;
        Ok(packet)
    }

    /// Handles bytes that arrived during the check window after the response.
    ///
    /// Such a message is always a rejection; the returned error carries the
    /// server's failure details when they can be parsed.
    pub fn handle_rejection(&mut self, body: &[u8]) -> ProtocolError {
        let err = match ApResponseMessage::decode(body) {
            Ok(ApResponseMessage {
                login_failed: Some(failed),
                ..
            }) => login_failed_error(&failed),
            Ok(_) => ProtocolError::HandshakeFailed(
                "unexpected server message after client response".to_string(),
            ),
            Err(e) => ProtocolError::HandshakeFailed(format!(
                "unparseable server message after client response: {}",
                e
            )),
        };
        self.fail(err)
    }

    /// Completes the handshake and hands out the session keys.
    pub fn finish(mut self) -> Result<SessionKeys> {
        self.expect_phase(HandshakePhase::ResponseSent, "finish handshake")?;
        self.phase = HandshakePhase::Established;
        self.accumulator.clear();
        self.session_keys.take().ok_or(ProtocolError::HandshakeIncomplete)
    }
}

impl fmt::Debug for ClientHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandshake")
            .field("phase", &self.phase)
            .field("accumulated", &self.accumulator.len())
            .finish_non_exhaustive()
    }
}
