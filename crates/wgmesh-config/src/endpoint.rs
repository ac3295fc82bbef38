//! WireGuard endpoint addressing.
//!
//! Endpoints name the publicly reachable UDP side of a peer as
//! `host[:port]`, where the host may be an IPv4/IPv6 address or a DNS name.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// Default WireGuard listen/endpoint port.
pub const DEFAULT_PORT: u16 = 51820;

/// An endpoint host: a literal IP address or a DNS name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Host {
    /// Literal IPv4 or IPv6 address.
    Ip(IpAddr),
    /// DNS name, resolved by the remote kernel at handshake time.
    Name(String),
}

impl Host {
    /// Returns the literal IP address, if this host is one.
    #[must_use]
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::Ip(ip) => Some(*ip),
            Self::Name(_) => None,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "{ip}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for Host {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::Ip(ip));
        }
        if s.is_empty() || s.contains([':', '/', ' ']) {
            return Err(ConfigError::InvalidEndpoint(format!("invalid host {s:?}")));
        }
        Ok(Self::Name(s.to_string()))
    }
}

/// A WireGuard endpoint: host plus optional port.
///
/// The port defaults to [`DEFAULT_PORT`] wherever the endpoint is used.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Endpoint host.
    pub host: Host,
    /// Endpoint port; `None` means the default.
    pub port: Option<u16>,
}

impl Endpoint {
    /// Creates an endpoint from host and optional port.
    #[must_use]
    pub fn new(host: Host, port: Option<u16>) -> Self {
        Self { host, port }
    }

    /// The port, with the WireGuard default applied.
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.host, self.port) {
            (Host::Ip(IpAddr::V6(ip)), Some(port)) => write!(f, "[{ip}]:{port}"),
            (host, Some(port)) => write!(f, "{host}:{port}"),
            (host, None) => write!(f, "{host}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // A bare IPv6 address contains colons but carries no port.
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::new(Host::Ip(ip), None));
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (addr, tail) = rest
                .split_once(']')
                .ok_or_else(|| ConfigError::InvalidEndpoint(s.to_string()))?;
            let ip = addr
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidEndpoint(s.to_string()))?;
            let port = match tail {
                "" => None,
                tail => Some(
                    tail.strip_prefix(':')
                        .ok_or_else(|| ConfigError::InvalidEndpoint(s.to_string()))?
                        .parse::<u16>()
                        .map_err(|_| ConfigError::InvalidEndpoint(s.to_string()))?,
                ),
            };
            return Ok(Self::new(Host::Ip(ip), port));
        }

        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidEndpoint(s.to_string()))?;
                Ok(Self::new(host.parse()?, Some(port)))
            }
            None => Ok(Self::new(s.parse()?, None)),
        }
    }
}

impl Serialize for Endpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
