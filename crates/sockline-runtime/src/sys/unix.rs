//! Unix socket syscalls via libc, with nix for errno and fcntl

use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::Shutdown;

use sockline_core::{Endpoint, Family};

/// Transport protocol of a new socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const CLOEXEC: libc::c_int = libc::SOCK_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const CLOEXEC: libc::c_int = 0;

#[inline]
fn domain_of(family: Family) -> libc::c_int {
    match family {
        Family::Ipv4 => libc::AF_INET,
        Family::Ipv6 => libc::AF_INET6,
    }
}

/// Create a socket and take ownership of the descriptor right away
pub fn open(family: Family, transport: Transport) -> Result<OwnedFd, Errno> {
    let (ty, proto) = match transport {
        Transport::Udp => (libc::SOCK_DGRAM, libc::IPPROTO_UDP),
        Transport::Tcp => (libc::SOCK_STREAM, libc::IPPROTO_TCP),
    };
    let fd = Errno::result(unsafe { libc::socket(domain_of(family), ty | CLOEXEC, proto) })?;
    // SAFETY: socket() just returned this descriptor and nothing else owns it.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    set_cloexec(fd.as_raw_fd())?;

    // No SIGPIPE on platforms without MSG_NOSIGNAL
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    set_int_option(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1)?;

    Ok(fd)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn set_cloexec(fd: RawFd) -> Result<(), Errno> {
    use nix::fcntl::FdFlag;
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map(drop)
}

pub fn set_nonblocking(fd: RawFd) -> Result<(), Errno> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

pub fn set_option<T>(fd: RawFd, level: libc::c_int, name: libc::c_int, value: &T) -> Result<(), Errno> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    Errno::result(ret).map(drop)
}

#[inline]
pub fn set_int_option(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> Result<(), Errno> {
    set_option(fd, level, name, &value)
}

pub fn bind(fd: RawFd, endpoint: &Endpoint) -> Result<(), Errno> {
    let (storage, len) = endpoint.to_sockaddr();
    let ret = unsafe {
        libc::bind(
            fd,
            &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
            len,
        )
    };
    Errno::result(ret).map(drop)
}

pub fn listen(fd: RawFd, backlog: i32) -> Result<(), Errno> {
    Errno::result(unsafe { libc::listen(fd, backlog) }).map(drop)
}

pub fn connect(fd: RawFd, endpoint: &Endpoint) -> Result<(), Errno> {
    let (storage, len) = endpoint.to_sockaddr();
    let ret = unsafe {
        libc::connect(
            fd,
            &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
            len,
        )
    };
    Errno::result(ret).map(drop)
}

/// Accept one pending connection
///
/// The peer endpoint falls back to unspecified if the kernel hands back an
/// address of a family we do not model.
pub fn accept(fd: RawFd) -> Result<(OwnedFd, Endpoint), Errno> {
    // SAFETY: sockaddr_storage is plain old data.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    let ret = unsafe {
        libc::accept4(
            fd,
            &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC,
        )
    };
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    let ret = unsafe {
        libc::accept(
            fd,
            &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut len,
        )
    };
    let accepted = Errno::result(ret)?;
    // SAFETY: accept() just returned this descriptor and nothing else owns it.
    let accepted = unsafe { OwnedFd::from_raw_fd(accepted) };
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    set_cloexec(accepted.as_raw_fd())?;
    let peer = Endpoint::from_sockaddr(&storage, len).unwrap_or_default();
    Ok((accepted, peer))
}

pub fn recv(fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
    let ret = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
    Errno::result(ret).map(|n| n as usize)
}

pub fn recv_from(fd: RawFd, buf: &mut [u8]) -> Result<(usize, Endpoint), Errno> {
    // SAFETY: sockaddr_storage is plain old data.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::recvfrom(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
            &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut len,
        )
    };
    let n = Errno::result(ret)? as usize;
    let from = Endpoint::from_sockaddr(&storage, len).unwrap_or_default();
    Ok((n, from))
}

pub fn send(fd: RawFd, buf: &[u8]) -> Result<usize, Errno> {
    let ret = unsafe { libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), SEND_FLAGS) };
    Errno::result(ret).map(|n| n as usize)
}

pub fn send_to(fd: RawFd, buf: &[u8], to: &Endpoint) -> Result<usize, Errno> {
    let (storage, len) = to.to_sockaddr();
    let ret = unsafe {
        libc::sendto(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            SEND_FLAGS,
            &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
            len,
        )
    };
    Errno::result(ret).map(|n| n as usize)
}

/// Address the kernel actually bound the socket to
pub fn local_endpoint(fd: RawFd) -> Result<Endpoint, Errno> {
    // SAFETY: sockaddr_storage is plain old data.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockname(
            fd,
            &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut len,
        )
    };
    Errno::result(ret)?;
    Endpoint::from_sockaddr(&storage, len).map_err(|_| Errno::EAFNOSUPPORT)
}

/// Wait up to `timeout` for `events` on one descriptor
///
/// Returns `Ok(None)` on timeout, otherwise the reported `revents`.
pub fn poll_one(fd: BorrowedFd<'_>, events: libc::c_short, timeout: Duration) -> Result<Option<libc::c_short>, Errno> {
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let ret = Errno::result(unsafe { libc::poll(&mut pfd, 1, millis) })?;
    if ret == 0 {
        Ok(None)
    } else {
        Ok(Some(pfd.revents))
    }
}

/// Stop all traffic on a descriptor without releasing the number
///
/// Blocked or later calls on the descriptor fail immediately, while the fd
/// stays owned until the socket object is dropped.
pub fn shutdown(fd: RawFd) -> Result<(), Errno> {
    nix::sys::socket::shutdown(fd, Shutdown::Both)
}

/// Join `group` and send to it through the same interface
///
/// IPv4 picks the interface by `interface`'s address, IPv6 by
/// `if_index`. An unspecified address or index 0 leaves the choice to the
/// kernel's routing table.
pub fn join_multicast(
    fd: RawFd,
    group: &Endpoint,
    interface: &Endpoint,
    if_index: u32,
) -> Result<(), Errno> {
    match group.family() {
        Family::Ipv4 => {
            let iface = interface.to_in_addr().map_err(|_| Errno::EAFNOSUPPORT)?;
            let mreq = libc::ip_mreq {
                imr_multiaddr: group.to_in_addr().map_err(|_| Errno::EAFNOSUPPORT)?,
                imr_interface: iface,
            };
            set_option(fd, libc::IPPROTO_IP, libc::IP_ADD_MEMBERSHIP, &mreq)?;
            if iface.s_addr != libc::INADDR_ANY {
                set_option(fd, libc::IPPROTO_IP, libc::IP_MULTICAST_IF, &iface)?;
            }
            Ok(())
        }
        Family::Ipv6 => {
            let mreq = libc::ipv6_mreq {
                ipv6mr_multiaddr: group.to_in6_addr().map_err(|_| Errno::EAFNOSUPPORT)?,
                ipv6mr_interface: if_index as _,
            };
            #[cfg(any(target_os = "linux", target_os = "android"))]
            let name = libc::IPV6_ADD_MEMBERSHIP;
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            let name = libc::IPV6_JOIN_GROUP;
            set_option(fd, libc::IPPROTO_IPV6, name, &mreq)?;
            if if_index != 0 {
                let index = if_index as libc::c_uint;
                set_option(fd, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_IF, &index)?;
            }
            Ok(())
        }
    }
}

/// Deliver our own multicast sends back to local listeners
pub fn enable_multicast_loop(fd: RawFd, family: Family) -> Result<(), Errno> {
    match family {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Family::Ipv4 => set_int_option(fd, libc::IPPROTO_IP, libc::IP_MULTICAST_LOOP, 1),
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        Family::Ipv4 => set_option(fd, libc::IPPROTO_IP, libc::IP_MULTICAST_LOOP, &1u8),
        Family::Ipv6 => set_int_option(fd, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_LOOP, 1),
    }
}

/// Human readable errno for log lines and error messages
pub fn describe(errno: Errno) -> String {
    format!("{:?} ({}): {}", errno, errno as i32, errno.desc())
}
