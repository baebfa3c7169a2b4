//! Endpoint - an address family aware IP address + port value
//!
//! An endpoint describes where traffic comes from or goes to. For local
//! endpoints the address usually names an interface; `0.0.0.0` / `::` is the
//! "any" address and port 0 is the "any" port, both of which get resolved by
//! the OS on bind.
//!
//! The address is kept in a fixed 16-byte buffer. IPv4 endpoints only use the
//! first four bytes and keep the tail zeroed, which lets equality, ordering and
//! hashing work on the whole buffer.

use core::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::EndpointError;
use crate::resolve::{AddressResolver, StaticResolver};

/// Address family of an endpoint
///
/// Declaration order is significant: IPv4 sorts before IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    /// Number of meaningful address bytes for this family
    #[inline]
    pub const fn addr_len(&self) -> usize {
        match self {
            Family::Ipv4 => 4,
            Family::Ipv6 => 16,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Ipv4 => f.write_str("IPv4"),
            Family::Ipv6 => f.write_str("IPv6"),
        }
    }
}

/// Immutable address + port value
///
/// Ordering compares family, then address bytes, then port.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    family: Family,
    addr: [u8; 16],
    port: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::UNSPECIFIED
    }
}

impl Endpoint {
    /// `0.0.0.0:0`
    pub const UNSPECIFIED: Endpoint = Endpoint {
        family: Family::Ipv4,
        addr: [0; 16],
        port: 0,
    };

    /// Parse an endpoint from an address string and port
    ///
    /// `addr` may be an IPv4/IPv6 literal or one of the aliases understood by
    /// [`StaticResolver`] (`lo`, `localhost`, `loopback`, `any`).
    pub fn new(addr: &str, port: u16) -> Result<Self, EndpointError> {
        Self::with_resolver(addr, port, &StaticResolver)
    }

    /// Parse an endpoint, letting `resolver` map names to an address literal first
    pub fn with_resolver(
        addr: &str,
        port: u16,
        resolver: &dyn AddressResolver,
    ) -> Result<Self, EndpointError> {
        let literal = resolver.resolve(addr)?;
        let ip = if literal.contains(':') {
            literal.parse::<Ipv6Addr>().map(IpAddr::V6)
        } else {
            literal.parse::<Ipv4Addr>().map(IpAddr::V4)
        }
        .map_err(|_| EndpointError::InvalidAddress(literal.clone()))?;
        Ok(Self::from_ip(ip, port))
    }

    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        let mut addr = [0u8; 16];
        let family = match ip {
            IpAddr::V4(v4) => {
                addr[..4].copy_from_slice(&v4.octets());
                Family::Ipv4
            }
            IpAddr::V6(v6) => {
                addr.copy_from_slice(&v6.octets());
                Family::Ipv6
            }
        };
        Self { family, addr, port }
    }

    /// The wildcard endpoint of a family (`0.0.0.0:port` or `[::]:port`)
    pub fn any(family: Family, port: u16) -> Self {
        Self {
            family,
            addr: [0; 16],
            port,
        }
    }

    #[inline]
    pub fn family(&self) -> Family {
        self.family
    }

    #[inline]
    pub fn is_ipv4(&self) -> bool {
        self.family == Family::Ipv4
    }

    #[inline]
    pub fn is_ipv6(&self) -> bool {
        self.family == Family::Ipv6
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The meaningful address bytes (4 for IPv4, 16 for IPv6), network order
    #[inline]
    pub fn octets(&self) -> &[u8] {
        &self.addr[..self.family.addr_len()]
    }

    pub fn ip(&self) -> IpAddr {
        match self.family {
            Family::Ipv4 => IpAddr::V4(Ipv4Addr::new(
                self.addr[0],
                self.addr[1],
                self.addr[2],
                self.addr[3],
            )),
            Family::Ipv6 => IpAddr::V6(Ipv6Addr::from(self.addr)),
        }
    }

    /// Same address, different port
    pub fn with_port(&self, port: u16) -> Self {
        Self { port, ..*self }
    }

    /// True if the address or the port is unspecified
    ///
    /// This is usually the case for late binding (TCP clients) or for an
    /// endpoint that was never configured.
    pub fn is_any(&self) -> bool {
        self.port == 0 || self.octets().iter().all(|b| *b == 0)
    }

    /// True for 224.0.0.0 - 239.255.255.255 and ff00::/8
    pub fn is_multicast(&self) -> bool {
        match self.family {
            Family::Ipv4 => (224..=239).contains(&self.addr[0]),
            Family::Ipv6 => self.addr[0] == 0xff,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::from_ip(addr.ip(), addr.port())
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(ep: Endpoint) -> Self {
        SocketAddr::new(ep.ip(), ep.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip() {
            IpAddr::V4(v4) => write!(f, "{}:{}", v4, self.port),
            IpAddr::V6(v6) => write!(f, "[{}]:{}", v6, self.port),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self)
    }
}

// ============================================================================
// Native address structures
// ============================================================================

#[cfg(unix)]
mod native {
    use super::*;
    use std::mem;

    impl Endpoint {
        fn check_family(&self, expected: Family) -> Result<(), EndpointError> {
            if self.family == expected {
                Ok(())
            } else {
                Err(EndpointError::WrongFamily { expected })
            }
        }

        fn raw_in_addr(&self) -> libc::in_addr {
            let octets = [self.addr[0], self.addr[1], self.addr[2], self.addr[3]];
            libc::in_addr {
                s_addr: u32::from_ne_bytes(octets),
            }
        }

        fn raw_sockaddr_in(&self) -> libc::sockaddr_in {
            // SAFETY: sockaddr_in is plain old data; all-zero is a valid value.
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = self.port.to_be();
            sin.sin_addr = self.raw_in_addr();
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd"
            ))]
            {
                sin.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
            }
            sin
        }

        fn raw_sockaddr_in6(&self) -> libc::sockaddr_in6 {
            // SAFETY: sockaddr_in6 is plain old data; all-zero is a valid value.
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = self.port.to_be();
            sin6.sin6_addr = libc::in6_addr { s6_addr: self.addr };
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd"
            ))]
            {
                sin6.sin6_len = mem::size_of::<libc::sockaddr_in6>() as u8;
            }
            sin6
        }

        /// Fill an `in_addr`; fails unless this is an IPv4 endpoint
        pub fn to_in_addr(&self) -> Result<libc::in_addr, EndpointError> {
            self.check_family(Family::Ipv4)?;
            Ok(self.raw_in_addr())
        }

        /// Fill an `in6_addr`; fails unless this is an IPv6 endpoint
        pub fn to_in6_addr(&self) -> Result<libc::in6_addr, EndpointError> {
            self.check_family(Family::Ipv6)?;
            Ok(libc::in6_addr { s6_addr: self.addr })
        }

        pub fn to_sockaddr_in(&self) -> Result<libc::sockaddr_in, EndpointError> {
            self.check_family(Family::Ipv4)?;
            Ok(self.raw_sockaddr_in())
        }

        pub fn to_sockaddr_in6(&self) -> Result<libc::sockaddr_in6, EndpointError> {
            self.check_family(Family::Ipv6)?;
            Ok(self.raw_sockaddr_in6())
        }

        /// Native storage plus the length the kernel expects for this family
        pub fn to_sockaddr(&self) -> (libc::sockaddr_storage, libc::socklen_t) {
            // SAFETY: sockaddr_storage is plain old data; all-zero is a valid value.
            let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
            let ptr = &mut storage as *mut libc::sockaddr_storage;
            // SAFETY: sockaddr_storage is large and aligned enough for any sockaddr.
            let len = unsafe {
                match self.family {
                    Family::Ipv4 => {
                        std::ptr::write(ptr as *mut libc::sockaddr_in, self.raw_sockaddr_in());
                        mem::size_of::<libc::sockaddr_in>()
                    }
                    Family::Ipv6 => {
                        std::ptr::write(ptr as *mut libc::sockaddr_in6, self.raw_sockaddr_in6());
                        mem::size_of::<libc::sockaddr_in6>()
                    }
                }
            };
            (storage, len as libc::socklen_t)
        }

        pub fn from_sockaddr_in(sin: &libc::sockaddr_in) -> Self {
            let mut addr = [0u8; 16];
            addr[..4].copy_from_slice(&sin.sin_addr.s_addr.to_ne_bytes());
            Self {
                family: Family::Ipv4,
                addr,
                port: u16::from_be(sin.sin_port),
            }
        }

        pub fn from_sockaddr_in6(sin6: &libc::sockaddr_in6) -> Self {
            Self {
                family: Family::Ipv6,
                addr: sin6.sin6_addr.s6_addr,
                port: u16::from_be(sin6.sin6_port),
            }
        }

        /// Read an endpoint from a native structure filled in by the kernel
        ///
        /// `len` must match the structure size of the stored family exactly.
        pub fn from_sockaddr(
            storage: &libc::sockaddr_storage,
            len: libc::socklen_t,
        ) -> Result<Self, EndpointError> {
            let family = storage.ss_family as libc::c_int;
            let len = len as usize;
            match family {
                libc::AF_INET if len == mem::size_of::<libc::sockaddr_in>() => {
                    // SAFETY: family and length identify the stored structure.
                    let sin = unsafe {
                        &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in)
                    };
                    Ok(Self::from_sockaddr_in(sin))
                }
                libc::AF_INET6 if len == mem::size_of::<libc::sockaddr_in6>() => {
                    // SAFETY: family and length identify the stored structure.
                    let sin6 = unsafe {
                        &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in6)
                    };
                    Ok(Self::from_sockaddr_in6(sin6))
                }
                _ => Err(EndpointError::InvalidAddress(format!(
                    "address family {} with {} bytes",
                    family, len
                ))),
            }
        }
    }
}
