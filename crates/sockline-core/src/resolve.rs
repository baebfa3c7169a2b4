//! Name resolution seams for endpoints
//!
//! Endpoints are built from strings that may be address literals or
//! well-known aliases. The resolver trait keeps interface name lookup out of
//! this crate; the runtime provides an implementation backed by the OS
//! interface table.

use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::error::EndpointError;

/// Maps a name to an IPv4/IPv6 address literal
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<String, EndpointError>;
}

/// Enumerates the names of the local network interfaces
pub trait InterfaceLister: Send + Sync {
    fn interfaces(&self) -> BTreeSet<String>;
}

/// Resolver that only knows literals and a fixed alias table
///
/// | alias                           | address     |
/// |---------------------------------|-------------|
/// | `lo`, `localhost`, `loopback`   | `127.0.0.1` |
/// | `any`                           | `0.0.0.0`   |
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticResolver;

impl StaticResolver {
    /// Alias lookup only, `None` for anything not in the table
    pub fn alias(name: &str) -> Option<&'static str> {
        match name {
            "lo" | "localhost" | "loopback" => Some("127.0.0.1"),
            "any" => Some("0.0.0.0"),
            _ => None,
        }
    }
}

impl AddressResolver for StaticResolver {
    fn resolve(&self, name: &str) -> Result<String, EndpointError> {
        let name = name.trim();
        if let Some(addr) = Self::alias(name) {
            return Ok(addr.to_string());
        }
        if name.parse::<IpAddr>().is_ok() {
            return Ok(name.to_string());
        }
        Err(EndpointError::InvalidAddress(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        let r = StaticResolver;
        assert_eq!(r.resolve("lo").unwrap(), "127.0.0.1");
        assert_eq!(r.resolve("localhost").unwrap(), "127.0.0.1");
        assert_eq!(r.resolve("loopback").unwrap(), "127.0.0.1");
        assert_eq!(r.resolve("any").unwrap(), "0.0.0.0");
    }

    #[test]
    fn test_literals_pass_through() {
        let r = StaticResolver;
        assert_eq!(r.resolve("10.0.0.1").unwrap(), "10.0.0.1");
        assert_eq!(r.resolve(" fe80::1 ").unwrap(), "fe80::1");
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(
            StaticResolver.resolve("eth0"),
            Err(EndpointError::InvalidAddress("eth0".into()))
        );
    }
}
