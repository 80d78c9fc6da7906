//! Upstream connection resolution and non-blocking connect (proxy role).
//!
//! Grounded on `src/UpstreamManager.cpp`'s `parse_url`/
//! `connect_to_upstream`: split a `scheme://host[:port][/...]` URL,
//! resolve the host, and hand back a non-blocking socket whose connect
//! may still be in progress. Name resolution uses
//! [`std::net::ToSocketAddrs`] rather than the C original's raw
//! `getaddrinfo` call — it is the same blocking platform resolver, just
//! reached through `std`'s safe wrapper instead of FFI, matching the
//! spec's allowance in §4.8 ("blocking call acceptable on the worker
//! thread that first observes the need to upstream").

use std::io;
use std::net::ToSocketAddrs;
use std::os::unix::io::RawFd;

use crate::epoll::set_nonblocking;
use crate::error::{NetError, Result};

/// A resolved `scheme://host[:port]` upstream target.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    /// Hostname or IP literal, without the port.
    pub host: String,
    /// Port to connect to — defaults to 80 for `http`.
    pub port: u16,
}

impl UpstreamTarget {
    /// Parses a `--proxy` URL into a host/port pair.
    ///
    /// Only the gross shape (`scheme://host[:port][/path]`) is validated
    /// here; `relay-config::ProxyArgs::validate` already rejected URLs
    /// missing a scheme or host before this type is constructed, so a
    /// malformed string reaching here is treated as a defect rather than
    /// routine input.
    pub fn parse(url: &str) -> Result<Self> {
        let after_scheme = url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url);
        let host_port = after_scheme
            .split_once('/')
            .map(|(hp, _)| hp)
            .unwrap_or(after_scheme);

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str.parse::<u16>().map_err(|_| NetError::Resolve {
                    host: host.to_string(),
                    port: 0,
                    source: io::Error::new(io::ErrorKind::InvalidInput, "invalid port"),
                })?;
                (host.to_string(), port)
            }
            None => (host_port.to_string(), 80),
        };

        Ok(Self { host, port })
    }
}

/// Resolves `target` and returns a non-blocking TCP socket with a
/// connect already in progress.
///
/// Mirrors `connect_to_upstream`: `getaddrinfo`-equivalent resolution,
/// try each candidate address in order, make the socket non-blocking
/// before calling `connect`, and accept `EINPROGRESS` as success — its
/// completion is observed later as the first writable-readiness event on
/// this descriptor (§4.8).
pub fn connect_nonblocking(target: &UpstreamTarget) -> Result<RawFd> {
    let addrs: Vec<_> = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| NetError::Resolve { host: target.host.clone(), port: target.port, source: e })?
        .collect();

    let mut last_err: Option<io::Error> = None;
    for addr in addrs {
        let domain = if addr.is_ipv6() { libc::AF_INET6 } else { libc::AF_INET };
        let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            last_err = Some(io::Error::last_os_error());
            continue;
        }
        if let Err(e) = set_nonblocking(fd) {
            unsafe { libc::close(fd) };
            last_err = Some(io::Error::new(io::ErrorKind::Other, e.to_string()));
            continue;
        }

        let (sockaddr, len) = socket_addr_to_raw(addr);
        let rc = unsafe { libc::connect(fd, &sockaddr as *const _ as *const libc::sockaddr, len) };
        if rc == 0 {
            return Ok(fd);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINPROGRESS) {
            return Ok(fd);
        }
        unsafe { libc::close(fd) };
        last_err = Some(err);
    }

    Err(NetError::Connect {
        host: target.host.clone(),
        port: target.port,
        source: last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")),
    })
}

fn socket_addr_to_raw(addr: std::net::SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = match addr {
        std::net::SocketAddr::V4(v4) => {
            let raw = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, raw);
            }
            std::mem::size_of::<libc::sockaddr_in>()
        }
        std::net::SocketAddr::V6(v6) => {
            let raw = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, raw);
            }
            std::mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults_to_port_80() {
        let t = UpstreamTarget::parse("http://example.com").unwrap();
        assert_eq!(t.host, "example.com");
        assert_eq!(t.port, 80);
    }

    #[test]
    fn parse_extracts_explicit_port() {
        let t = UpstreamTarget::parse("http://127.0.0.1:8888").unwrap();
        assert_eq!(t.host, "127.0.0.1");
        assert_eq!(t.port, 8888);
    }

    #[test]
    fn parse_ignores_path_suffix() {
        let t = UpstreamTarget::parse("http://backend.local:9000/v1/api").unwrap();
        assert_eq!(t.host, "backend.local");
        assert_eq!(t.port, 9000);
    }

    #[test]
    fn connect_to_loopback_listener_succeeds() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = UpstreamTarget { host: "127.0.0.1".to_string(), port };
        let fd = connect_nonblocking(&target).unwrap();
        assert!(fd >= 0);
        unsafe { libc::close(fd) };
    }
}
