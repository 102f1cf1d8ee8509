//! Access point addresses and first-available connection.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::SessionError;

/// A `host:port` candidate for the access point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessPoint {
    pub host: String,
    pub port: u16,
}

impl AccessPoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for AccessPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in access point {:?}", s))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(format!("missing host in access point {:?}", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in access point {:?}: {}", s, e))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for AccessPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Connects to the first candidate that accepts a TCP connection.
///
/// Each attempt is bounded by `connect_timeout`. No retries beyond walking
/// the list once.
pub async fn connect_first(
    candidates: &[AccessPoint],
    connect_timeout: Duration,
) -> Result<(TcpStream, AccessPoint), SessionError> {
    if candidates.is_empty() {
        return Err(SessionError::NoAccessPoint);
    }

    let mut last_error = String::new();
    for ap in candidates {
        tracing::debug!(access_point = %ap, "Connecting");
        let attempt = timeout(
            connect_timeout,
            TcpStream::connect((ap.host.as_str(), ap.port)),
        )
        .await;
        match attempt {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(access_point = %ap, "Failed to set TCP_NODELAY: {}", e);
                }
                tracing::info!(access_point = %ap, "Connected to access point");
                return Ok((stream, ap.clone()));
            }
            Ok(Err(e)) => {
                tracing::warn!(access_point = %ap, "Connection failed: {}", e);
                last_error = format!("{}: {}", ap, e);
            }
            Err(_) => {
                tracing::warn!(access_point = %ap, "Connection timed out");
                last_error = format!("{}: timed out after {:?}", ap, connect_timeout);
            }
        }
    }

    Err(SessionError::AccessPointUnreachable(last_error))
}
