//! Server address resolution.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// The configured server text is neither an IPv6 nor an IPv4 literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressError {
    pub text: String,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not an IPv6 or IPv4 address", self.text)
    }
}

impl std::error::Error for AddressError {}

/// Resolve `server` to exactly one address family, trying IPv6 first.
pub fn resolve(server: &str, port: u16) -> Result<SocketAddr, AddressError> {
    let server = server.trim();

    if let Ok(ip) = server.parse::<Ipv6Addr>() {
        return Ok(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)));
    }

    server
        .parse::<Ipv4Addr>()
        .map(|ip| SocketAddr::V4(SocketAddrV4::new(ip, port)))
        .map_err(|_| AddressError {
            text: server.to_string(),
        })
}
