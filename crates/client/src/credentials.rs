//! Login credentials and the login exchange payloads.

use std::fmt;

use prost::Message;
use protocol::handshake::login_failed_error;
use protocol::proto::{
    ApLoginFailed, ApWelcome, AuthenticationType, ClientResponseEncrypted, CpuFamily,
    LoginCredentials, Os, SystemInfo,
};
use protocol::ProtocolError;
use rand::RngCore;

/// Length of a generated device id, in random bytes.
const DEVICE_ID_BYTES: usize = 20;

/// Credentials presented at login. Contents are passed through verbatim.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub auth_type: AuthenticationType,
    pub auth_data: Vec<u8>,
}

impl Credentials {
    /// Username and password login.
    pub fn with_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            auth_type: AuthenticationType::AuthenticationUserPass,
            auth_data: password.into().into_bytes(),
        }
    }

    /// Login with a reusable credential blob handed out by a previous session.
    pub fn stored(username: impl Into<String>, auth_data: impl Into<Vec<u8>>) -> Self {
        Self {
            username: username.into(),
            auth_type: AuthenticationType::AuthenticationStoredSpotifyCredentials,
            auth_data: auth_data.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("auth_type", &self.auth_type)
            .field("auth_data", &format_args!("<{} bytes>", self.auth_data.len()))
            .finish()
    }
}

/// What the server granted on a successful login.
#[derive(Debug, Clone)]
pub struct Welcome {
    pub canonical_username: String,
    pub reusable_credentials: Credentials,
}

/// Generates a random 40 hex character device id.
pub fn random_device_id() -> String {
    let mut bytes = [0u8; DEVICE_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn cpu_family() -> CpuFamily {
    match std::env::consts::ARCH {
        "x86" => CpuFamily::CpuX86,
        "x86_64" => CpuFamily::CpuX8664,
        "arm" | "aarch64" => CpuFamily::CpuArm,
        "powerpc" => CpuFamily::CpuPpc,
        "powerpc64" => CpuFamily::CpuPpc64,
        _ => CpuFamily::CpuUnknown,
    }
}

fn os() -> Os {
    match std::env::consts::OS {
        "windows" => Os::OsWindows,
        "macos" => Os::OsOsx,
        "ios" => Os::OsIphoneos,
        "linux" => Os::OsLinux,
        "android" => Os::OsAndroid,
        _ => Os::OsUnknown,
    }
}

/// Builds the body of the `Login` frame.
///
/// The device name and version are reported together as the system
/// information string, e.g. `"apconnect 1.0"`.
pub fn login_payload(
    credentials: &Credentials,
    device_id: &str,
    device_name: &str,
    version_string: &str,
) -> Vec<u8> {
    ClientResponseEncrypted {
        login_credentials: LoginCredentials {
            username: Some(credentials.username.clone()),
            typ: credentials.auth_type as i32,
            auth_data: Some(credentials.auth_data.clone()),
        },
        system_info: SystemInfo {
            cpu_family: cpu_family() as i32,
            os: os() as i32,
            system_information_string: Some(format!("{} {}", device_name, version_string)),
            device_id: Some(device_id.to_string()),
        },
        version_string: Some(version_string.to_string()),
    }
    .encode_to_vec()
}

/// Parses an `APWelcome` frame body.
pub fn parse_welcome(payload: &[u8]) -> Result<Welcome, ProtocolError> {
    let welcome = ApWelcome::decode(payload)?;
    let auth_type = AuthenticationType::try_from(welcome.reusable_auth_credentials_type)
        .unwrap_or(AuthenticationType::AuthenticationStoredSpotifyCredentials);
    Ok(Welcome {
        reusable_credentials: Credentials {
            username: welcome.canonical_username.clone(),
            auth_type,
            auth_data: welcome.reusable_auth_credentials,
        },
        canonical_username: welcome.canonical_username,
    })
}

/// Maps an `AuthFailure` frame body to an authentication error.
pub fn parse_auth_failure(payload: &[u8]) -> ProtocolError {
    match ApLoginFailed::decode(payload) {
        Ok(failed) => login_failed_error(&failed),
        Err(e) => ProtocolError::AuthenticationFailed {
            code: -1,
            reason: format!("unparseable login failure: {}", e),
        },
    }
}
