//! Value objects for listeners.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A TCP/UDP port in `1..=65535`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Port(u16);

impl Port {
    /// Creates a port, rejecting zero and values above 65535.
    pub fn new(value: i64) -> Result<Self, DomainError> {
        match u16::try_from(value) {
            Ok(port) if port > 0 => Ok(Self(port)),
            _ => Err(DomainError::InvalidPort { value }),
        }
    }

    /// Returns the port number.
    pub fn get(&self) -> u16 {
        self.0
    }
}

impl TryFrom<i64> for Port {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Port> for i64 {
    fn from(port: Port) -> Self {
        i64::from(port.0)
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Protocol a listener forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerProtocol {
    Tcp,
    Http,
}

impl ListenerProtocol {
    /// Returns the protocol name as stored and sent to backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerProtocol::Tcp => "tcp",
            ListenerProtocol::Http => "http",
        }
    }
}

impl std::str::FromStr for ListenerProtocol {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(ListenerProtocol::Tcp),
            "http" => Ok(ListenerProtocol::Http),
            _ => Err(DomainError::UnsupportedProtocol {
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ListenerProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
