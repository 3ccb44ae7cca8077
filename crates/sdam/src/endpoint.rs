//! Network endpoints identifying a server.

use std::{fmt, str::FromStr};

use crate::error::{Result, SdamError};

/// Port used when an endpoint string carries none.
pub const DEFAULT_PORT: u16 = 27017;

/// A `host:port` pair identifying a server process.
///
/// Host names are case-insensitive and stored lowercased, so two endpoints
/// naming the same host with different casing compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndPoint {
    host: String,
    port: u16,
}

impl EndPoint {
    /// Creates an endpoint from a host and port.
    #[must_use]
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self { host: host.as_ref().trim_end_matches('.').to_ascii_lowercase(), port }
    }

    /// Returns the host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parses `host`, `host:port` or `[ipv6]:port`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the host is empty or the port is not
    /// a valid number.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (host, port) = if let Some(rest) = value.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| SdamError::config(format!("Invalid endpoint '{value}'.")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(port),
                None if tail.is_empty() => None,
                None => return Err(SdamError::config(format!("Invalid endpoint '{value}'."))),
            };
            (host, port)
        } else {
            match value.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (value, None),
            }
        };

        if host.is_empty() {
            return Err(SdamError::config(format!("Endpoint '{value}' has an empty host.")));
        }

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| SdamError::config(format!("Invalid port in endpoint '{value}'.")))?,
            None => DEFAULT_PORT,
        };

        Ok(Self::new(host, port))
    }
}

impl FromStr for EndPoint {
    type Err = SdamError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
