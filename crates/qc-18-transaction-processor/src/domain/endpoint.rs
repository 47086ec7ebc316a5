//! Validator endpoint address.

use std::fmt;
use std::str::FromStr;

use super::errors::EndpointError;

const TCP_SCHEME: &str = "tcp://";

/// A parsed `tcp://host:port` validator address. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        let rest = s
            .strip_prefix(TCP_SCHEME)
            .ok_or_else(|| EndpointError::UnsupportedScheme(s.to_string()))?;

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::InvalidPort(s.to_string()))?;

        // Bracketed IPv6 literals keep their brackets for `host:port` joins.
        if host.is_empty() || host == "[]" {
            return Err(EndpointError::MissingHost(s.to_string()));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| EndpointError::InvalidPort(s.to_string()))?;
        if port == 0 {
            return Err(EndpointError::InvalidPort(s.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TCP_SCHEME}{}:{}", self.host, self.port)
    }
}
