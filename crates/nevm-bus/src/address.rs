use std::fmt;
use std::str::FromStr;

use crate::error::BusError;

const TCP_SCHEME: &str = "tcp://";

/// A `tcp://host:port` endpoint address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form accepted by the socket APIs. The `*` wildcard binds
    /// every interface.
    pub fn socket_addr(&self) -> String {
        let host = if self.host == "*" { "0.0.0.0" } else { &self.host };
        format!("{}:{}", host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", TCP_SCHEME, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix(TCP_SCHEME).unwrap_or(s);
        if rest.contains("://") {
            return Err(BusError::InvalidAddress(format!("unsupported transport in {}", s)));
        }

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| BusError::InvalidAddress(format!("missing port in {}", s)))?;
        if host.is_empty() {
            return Err(BusError::InvalidAddress(format!("missing host in {}", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| BusError::InvalidAddress(format!("invalid port in {}", s)))?;

        Ok(Endpoint::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_endpoint() {
        let endpoint: Endpoint = "tcp://127.0.0.1:29433".parse().unwrap();
        assert_eq!(endpoint.host(), "127.0.0.1");
        assert_eq!(endpoint.port(), 29433);
        assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:29433");
        assert_eq!(endpoint.socket_addr(), "127.0.0.1:29433");
    }

    #[test]
    fn test_scheme_is_optional() {
        let endpoint: Endpoint = "localhost:8000".parse().unwrap();
        assert_eq!(endpoint.socket_addr(), "localhost:8000");
    }

    #[test]
    fn test_wildcard_host() {
        let endpoint: Endpoint = "tcp://*:29434".parse().unwrap();
        assert_eq!(endpoint.socket_addr(), "0.0.0.0:29434");
    }

    #[test]
    fn test_ipv6_host() {
        let endpoint: Endpoint = "tcp://[::1]:5000".parse().unwrap();
        assert_eq!(endpoint.socket_addr(), "[::1]:5000");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in ["tcp://127.0.0.1", "ipc:///tmp/sock", "tcp://:80", "tcp://host:99999"] {
            assert!(
                matches!(bad.parse::<Endpoint>(), Err(BusError::InvalidAddress(_))),
                "{} parsed",
                bad
            );
        }
    }
}
