//! Protobuf messages exchanged with the access point.
//!
//! The schemas are proto2: required fields are always emitted and repeated
//! enum fields are encoded unpacked. Only the fields this client reads or
//! writes are declared; anything else the server sends is skipped on decode.

use prost::{Enumeration, Message};

// Handshake: client hello

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Product {
    Client = 0,
    Libspotify = 1,
    Mobile = 2,
    Partner = 3,
    LibspotifyEmbedded = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum ProductFlags {
    ProductFlagNone = 0,
    ProductFlagDevBuild = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Platform {
    Win32X86 = 0,
    OsxX86 = 1,
    LinuxX86 = 2,
    IphoneArm = 3,
    AndroidArm = 6,
    LinuxX8664 = 8,
    OsxX8664 = 9,
    LinuxArm = 17,
    Win32X8664 = 39,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Cryptosuite {
    Shannon = 0,
    Rc4Sha1Hmac = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct BuildInfo {
    #[prost(enumeration = "Product", required, tag = "10")]
    pub product: i32,
    #[prost(enumeration = "ProductFlags", repeated, packed = "false", tag = "20")]
    pub product_flags: Vec<i32>,
    #[prost(enumeration = "Platform", required, tag = "30")]
    pub platform: i32,
    #[prost(uint64, required, tag = "40")]
    pub version: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoDiffieHellmanHello {
    #[prost(bytes = "vec", required, tag = "10")]
    pub gc: Vec<u8>,
    #[prost(uint32, required, tag = "20")]
    pub server_keys_known: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoHelloUnion {
    #[prost(message, optional, tag = "10")]
    pub diffie_hellman: Option<LoginCryptoDiffieHellmanHello>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientHello {
    #[prost(message, required, tag = "10")]
    pub build_info: BuildInfo,
    #[prost(enumeration = "Cryptosuite", repeated, packed = "false", tag = "30")]
    pub cryptosuites_supported: Vec<i32>,
    #[prost(message, required, tag = "50")]
    pub login_crypto_hello: LoginCryptoHelloUnion,
    #[prost(bytes = "vec", required, tag = "60")]
    pub client_nonce: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "70")]
    pub padding: Option<Vec<u8>>,
}

// Handshake: server response

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoDiffieHellmanChallenge {
    #[prost(bytes = "vec", required, tag = "10")]
    pub gs: Vec<u8>,
    #[prost(int32, required, tag = "20")]
    pub server_signature_key: i32,
    #[prost(bytes = "vec", required, tag = "30")]
    pub gs_signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoChallengeUnion {
    #[prost(message, optional, tag = "10")]
    pub diffie_hellman: Option<LoginCryptoDiffieHellmanChallenge>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ApChallenge {
    #[prost(message, required, tag = "10")]
    pub login_crypto_challenge: LoginCryptoChallengeUnion,
    #[prost(bytes = "vec", required, tag = "50")]
    pub server_nonce: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "60")]
    pub padding: Option<Vec<u8>>,
}

/// Failure codes carried by [`ApLoginFailed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum ErrorCode {
    ProtocolError = 0,
    TryAnotherAp = 2,
    BadConnectionId = 5,
    TravelRestriction = 9,
    PremiumAccountRequired = 11,
    BadCredentials = 12,
    CouldNotValidateCredentials = 13,
    AccountExists = 14,
    ExtraVerificationRequired = 15,
    InvalidAppKey = 16,
    ApplicationBanned = 17,
}

impl ErrorCode {
    /// Short name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::TryAnotherAp => "TryAnotherAP",
            ErrorCode::BadConnectionId => "BadConnectionId",
            ErrorCode::TravelRestriction => "TravelRestriction",
            ErrorCode::PremiumAccountRequired => "PremiumAccountRequired",
            ErrorCode::BadCredentials => "BadCredentials",
            ErrorCode::CouldNotValidateCredentials => "CouldNotValidateCredentials",
            ErrorCode::AccountExists => "AccountExists",
            ErrorCode::ExtraVerificationRequired => "ExtraVerificationRequired",
            ErrorCode::InvalidAppKey => "InvalidAppKey",
            ErrorCode::ApplicationBanned => "ApplicationBanned",
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ApLoginFailed {
    #[prost(enumeration = "ErrorCode", required, tag = "10")]
    pub error_code: i32,
    #[prost(int32, optional, tag = "20")]
    pub retry_delay: Option<i32>,
    #[prost(int32, optional, tag = "30")]
    pub expiry: Option<i32>,
    #[prost(string, optional, tag = "40")]
    pub error_description: Option<String>,
}

impl ApLoginFailed {
    /// Human readable reason: the server description when present, else the code name.
    pub fn reason(&self) -> String {
        match &self.error_description {
            Some(description) if !description.is_empty() => description.clone(),
            _ => match ErrorCode::try_from(self.error_code) {
                Ok(code) => code.name().to_string(),
                Err(_) => format!("unknown error code {}", self.error_code),
            },
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ApResponseMessage {
    #[prost(message, optional, tag = "10")]
    pub challenge: Option<ApChallenge>,
    #[prost(message, optional, tag = "30")]
    pub login_failed: Option<ApLoginFailed>,
}

// Handshake: client response

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoDiffieHellmanResponse {
    #[prost(bytes = "vec", required, tag = "10")]
    pub hmac: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoResponseUnion {
    #[prost(message, optional, tag = "10")]
    pub diffie_hellman: Option<LoginCryptoDiffieHellmanResponse>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PowResponseUnion {}

#[derive(Clone, PartialEq, Message)]
pub struct CryptoResponseUnion {}

#[derive(Clone, PartialEq, Message)]
pub struct ClientResponsePlaintext {
    #[prost(message, required, tag = "10")]
    pub login_crypto_response: LoginCryptoResponseUnion,
    #[prost(message, required, tag = "20")]
    pub pow_response: PowResponseUnion,
    #[prost(message, required, tag = "30")]
    pub crypto_response: CryptoResponseUnion,
}

// Login

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum AuthenticationType {
    AuthenticationUserPass = 0,
    AuthenticationStoredSpotifyCredentials = 1,
    AuthenticationStoredFacebookCredentials = 2,
    AuthenticationSpotifyToken = 3,
    AuthenticationFacebookToken = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum CpuFamily {
    CpuUnknown = 0,
    CpuX86 = 1,
    CpuX8664 = 2,
    CpuPpc = 3,
    CpuPpc64 = 4,
    CpuArm = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Os {
    OsUnknown = 0,
    OsWindows = 1,
    OsOsx = 2,
    OsIphoneos = 3,
    OsLinux = 5,
    OsAndroid = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum AccountType {
    Spotify = 0,
    Facebook = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCredentials {
    #[prost(string, optional, tag = "10")]
    pub username: Option<String>,
    #[prost(enumeration = "AuthenticationType", required, tag = "20")]
    pub typ: i32,
    #[prost(bytes = "vec", optional, tag = "30")]
    pub auth_data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SystemInfo {
    #[prost(enumeration = "CpuFamily", required, tag = "10")]
    pub cpu_family: i32,
    #[prost(enumeration = "Os", required, tag = "60")]
    pub os: i32,
    #[prost(string, optional, tag = "90")]
    pub system_information_string: Option<String>,
    #[prost(string, optional, tag = "100")]
    pub device_id: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientResponseEncrypted {
    #[prost(message, required, tag = "10")]
    pub login_credentials: LoginCredentials,
    #[prost(message, required, tag = "50")]
    pub system_info: SystemInfo,
    #[prost(string, optional, tag = "70")]
    pub version_string: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ApWelcome {
    #[prost(string, required, tag = "10")]
    pub canonical_username: String,
    #[prost(enumeration = "AccountType", required, tag = "20")]
    pub account_type_logged_in: i32,
    #[prost(enumeration = "AccountType", required, tag = "25")]
    pub credentials_type_logged_in: i32,
    #[prost(enumeration = "AuthenticationType", required, tag = "30")]
    pub reusable_auth_credentials_type: i32,
    #[prost(bytes = "vec", required, tag = "40")]
    pub reusable_auth_credentials: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "50")]
    pub lfs_secret: Option<Vec<u8>>,
}

// Mercury

#[derive(Clone, PartialEq, Message)]
pub struct UserField {
    #[prost(string, optional, tag = "1")]
    pub key: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub value: Option<Vec<u8>>,
}

/// First part of every Mercury message.
#[derive(Clone, PartialEq, Message)]
pub struct Header {
    #[prost(string, optional, tag = "1")]
    pub uri: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub content_type: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub method: Option<String>,
    #[prost(sint32, optional, tag = "4")]
    pub status_code: Option<i32>,
    #[prost(message, repeated, tag = "6")]
    pub user_fields: Vec<UserField>,
}
