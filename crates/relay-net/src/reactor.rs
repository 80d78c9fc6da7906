//! The edge-triggered readiness loop.
//!
//! Create a non-blocking listening socket, register it with epoll, then
//! loop on `epoll_wait` dispatching every event to the worker pool as a
//! task — the listener's own readiness becomes an accept task,
//! everything else becomes an I/O task. The origin server and the proxy
//! share this exact loop, parameterized by [`crate::handler::Role`]
//! through the [`ConnectionHandler`] it owns.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::epoll::{set_nonblocking, Epoll, Interest};
use crate::error::{NetError, Result};
use crate::handler::{ConnectionHandler, Role};
use crate::pool::WorkerPool;
use crate::table::ConnectionTable;

/// Maximum events drained from `epoll_wait` per iteration, matching the
/// original's `MAX_EVENTS` buffer.
const MAX_EVENTS: usize = 1024;

/// How long a single `epoll_wait` call blocks before re-checking the
/// shutdown flag. Finite rather than the original's `-1` (block forever)
/// so `Reactor::request_shutdown` can take effect promptly without a
/// signal-handling dependency.
const POLL_TIMEOUT_MS: i32 = 1000;

/// Owns the listening socket and the multiplexer, and drives the
/// accept/I/O dispatch loop (§4.5). Single-threaded by design — all
/// concurrency comes from the [`WorkerPool`] it dispatches onto.
pub struct Reactor {
    listen_fd: RawFd,
    epoll: Arc<Epoll>,
    pool: WorkerPool,
    handler: Arc<ConnectionHandler>,
    table: Arc<ConnectionTable>,
    shutdown: Arc<AtomicBool>,
}

impl Reactor {
    /// Binds `addr`, creates the epoll instance and worker pool, and
    /// wires up a [`ConnectionHandler`] for `role`.
    pub fn bind(addr: SocketAddr, threads: usize, role: Role) -> Result<Self> {
        let listen_fd = create_listener(addr)?;
        let epoll = Arc::new(Epoll::new()?);
        epoll.add(listen_fd, Interest::ReadOnly)?;

        let table = Arc::new(ConnectionTable::new());
        let handler = Arc::new(ConnectionHandler::new(Arc::clone(&table), Arc::clone(&epoll), role));
        let pool = WorkerPool::new(threads);

        Ok(Self {
            listen_fd,
            epoll,
            pool,
            handler,
            table,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A clone of the shutdown flag, so a signal handler or another
    /// thread can request [`Reactor::run`] to exit.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Runs the accept/dispatch loop until shutdown is requested or
    /// `epoll_wait` fails outright. On return, the worker pool has been
    /// stopped and every tracked connection closed (§5 "Cancellation").
    pub fn run(self) -> Result<()> {
        let mut events_buf = vec![unsafe { std::mem::zeroed::<libc::epoll_event>() }; MAX_EVENTS];
        let listen_fd = self.listen_fd;

        while !self.shutdown.load(Ordering::SeqCst) {
            let events = match self.epoll.wait(&mut events_buf, POLL_TIMEOUT_MS) {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!(error = %e, "epoll_wait failed, shutting down reactor");
                    break;
                }
            };

            for event in events {
                if event.fd == listen_fd {
                    let handler = Arc::clone(&self.handler);
                    if self.pool.submit(move || handler.accept_all(listen_fd)).is_err() {
                        tracing::warn!("worker pool stopped, dropping accept task");
                    }
                } else {
                    let handler = Arc::clone(&self.handler);
                    let fd = event.fd;
                    let mask = event.mask;
                    if self.pool.submit(move || handler.handle_event(fd, mask)).is_err() {
                        tracing::warn!(fd, "worker pool stopped, dropping I/O task");
                    }
                }
            }
        }

        self.pool.stop();
        self.table.clear();
        unsafe {
            libc::close(listen_fd);
        }
        Ok(())
    }
}

/// Creates a non-blocking, `SO_REUSEADDR` listening socket bound to
/// `addr` with a backlog of `SOMAXCONN`.
///
/// Built from raw `socket`/`setsockopt`/`bind`/`listen` calls rather
/// than `std::net::TcpListener`, since `std`'s listener does not expose
/// a way to set `SO_REUSEADDR` before `bind`.
fn create_listener(addr: SocketAddr) -> Result<RawFd> {
    let domain = if addr.is_ipv6() { libc::AF_INET6 } else { libc::AF_INET };
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(NetError::Socket(io::Error::last_os_error()));
    }

    let reuse: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuse as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let bind_rc = match addr {
        SocketAddr::V4(v4) => {
            let raw = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) },
                sin_zero: [0; 8],
            };
            unsafe {
                libc::bind(
                    fd,
                    &raw as *const _ as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(v6) => {
            let raw = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                libc::bind(
                    fd,
                    &raw as *const _ as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };
    if bind_rc < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(NetError::Bind { addr: addr.to_string(), source: err });
    }

    if unsafe { libc::listen(fd, libc::SOMAXCONN) } < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(NetError::Listen(err));
    }

    if let Err(e) = set_nonblocking(fd) {
        unsafe { libc::close(fd) };
        return Err(e);
    }

    Ok(fd)
}
