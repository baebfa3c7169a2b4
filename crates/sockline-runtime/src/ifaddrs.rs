//! Local network interface lookup
//!
//! Backed by `getifaddrs(3)` through nix. Only interfaces carrying an IPv4 or
//! IPv6 address are reported.

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

use nix::ifaddrs::getifaddrs;
use nix::net::if_::if_nametoindex;

use sockline_core::{AddressResolver, EndpointError, InterfaceLister, StaticResolver};

/// (interface name, address) for every IP address of every interface
fn interface_addresses() -> Vec<(String, IpAddr)> {
    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!(error = %e, "getifaddrs failed");
            return Vec::new();
        }
    };
    addrs
        .filter_map(|ifa| {
            let storage = ifa.address?;
            let ip = if let Some(sin) = storage.as_sockaddr_in() {
                IpAddr::V4(*SocketAddrV4::from(*sin).ip())
            } else if let Some(sin6) = storage.as_sockaddr_in6() {
                IpAddr::V6(*SocketAddrV6::from(*sin6).ip())
            } else {
                return None;
            };
            Some((ifa.interface_name, ip))
        })
        .collect()
}

/// Names of the interfaces that carry an IPv4 or IPv6 address
pub fn list_interfaces() -> BTreeSet<String> {
    interface_addresses()
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}

/// Index of the interface carrying `ip`, or 0 if no interface does
pub(crate) fn interface_index(ip: IpAddr) -> u32 {
    let Some((name, _)) = interface_addresses().into_iter().find(|(_, addr)| *addr == ip) else {
        return 0;
    };
    match if_nametoindex(name.as_str()) {
        Ok(index) => index as u32,
        Err(e) => {
            tracing::warn!(interface = %name, error = %e, "if_nametoindex failed");
            0
        }
    }
}

/// Resolver that also understands local interface names
///
/// Aliases and literals resolve like [`StaticResolver`]; anything else is
/// matched case-insensitively against the interface table and resolves to
/// that interface's first IPv4 address, or its first IPv6 address if it has
/// none.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterfaceResolver;

impl AddressResolver for InterfaceResolver {
    fn resolve(&self, name: &str) -> Result<String, EndpointError> {
        if let Ok(addr) = StaticResolver.resolve(name) {
            return Ok(addr);
        }
        let wanted = name.trim();
        let candidates: Vec<IpAddr> = interface_addresses()
            .into_iter()
            .filter(|(ifname, _)| ifname.eq_ignore_ascii_case(wanted))
            .map(|(_, ip)| ip)
            .collect();
        candidates
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| candidates.first())
            .map(|ip| ip.to_string())
            .ok_or_else(|| EndpointError::InvalidAddress(wanted.to_string()))
    }
}

impl InterfaceLister for InterfaceResolver {
    fn interfaces(&self) -> BTreeSet<String> {
        list_interfaces()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockline_core::Endpoint;

    #[test]
    fn test_literals_still_resolve() {
        let ep = Endpoint::with_resolver("10.1.1.1", 7, &InterfaceResolver).unwrap();
        assert_eq!(ep.octets(), &[10, 1, 1, 1]);
        let ep = Endpoint::with_resolver("localhost", 7, &InterfaceResolver).unwrap();
        assert_eq!(ep.octets(), &[127, 0, 0, 1]);
    }

    #[test]
    fn test_interface_names_resolve() {
        // Every name the table reports must resolve to an address.
        for name in InterfaceResolver.interfaces() {
            let ep = Endpoint::with_resolver(&name, 1, &InterfaceResolver);
            assert!(ep.is_ok(), "interface {} did not resolve", name);
        }
    }

    #[test]
    fn test_loopback_has_index() {
        assert_ne!(interface_index(IpAddr::from([127, 0, 0, 1])), 0);
        assert_eq!(interface_index(IpAddr::from([192, 0, 2, 254])), 0);
    }

    #[test]
    fn test_unknown_interface() {
        assert!(InterfaceResolver
            .resolve("definitely-not-an-interface0")
            .is_err());
    }
}
