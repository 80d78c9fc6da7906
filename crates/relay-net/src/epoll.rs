//! Thin safe wrapper around `epoll(7)`.
//!
//! Wraps raw `epoll_create1`/`epoll_ctl`/`epoll_wait` calls in a small
//! `libc`-backed type so the reactor and the connection handler share
//! one owned descriptor instead of passing a bare `int` around.

use std::io;
use std::os::unix::io::RawFd;

use crate::error::{NetError, Result};

/// The readiness directions a descriptor can be interested in.
///
/// Every interest set produced here folds in `EPOLLET`: the reactor is
/// edge-triggered throughout, so it is never left as a caller-supplied
/// flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Readable only. Used for freshly accepted client sockets and for a
    /// connection whose output buffer has drained.
    ReadOnly,
    /// Readable and writable. Used once a side has data queued to write.
    ReadWrite,
}

impl Interest {
    fn bits(self) -> u32 {
        let base = libc::EPOLLIN as u32 | libc::EPOLLET as u32;
        match self {
            Interest::ReadOnly => base,
            Interest::ReadWrite => base | libc::EPOLLOUT as u32,
        }
    }
}

/// One readiness event reported by [`Epoll::wait`].
#[derive(Debug, Clone, Copy)]
pub struct Event {
    /// The descriptor this event concerns.
    pub fd: RawFd,
    /// Raw `EPOLL*` bitmask.
    pub mask: u32,
}

impl Event {
    /// Whether the readable bit is set.
    pub fn readable(&self) -> bool {
        self.mask & libc::EPOLLIN as u32 != 0
    }

    /// Whether the writable bit is set.
    pub fn writable(&self) -> bool {
        self.mask & libc::EPOLLOUT as u32 != 0
    }

    /// Whether an error or hangup was reported.
    pub fn error_or_hangup(&self) -> bool {
        self.mask & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0
    }
}

/// An owned `epoll` instance.
///
/// Safe for concurrent `add`/`modify`/`delete` from worker threads while
/// the reactor thread concurrently calls `wait`, per the kernel's epoll
/// concurrency guarantees (§5: "the multiplexer handle is shared by the
/// reactor (add/wait) and workers (mod/del) and must be safe for
/// concurrent calls").
pub struct Epoll {
    fd: RawFd,
}

impl Epoll {
    /// Creates a new epoll instance.
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::epoll_create1(0) };
        if fd < 0 {
            return Err(NetError::EpollCreate(io::Error::last_os_error()));
        }
        Ok(Self { fd })
    }

    fn ctl(&self, op: i32, fd: RawFd, interest: Option<Interest>) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: interest.map(Interest::bits).unwrap_or(0),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.fd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(NetError::EpollCtl { fd, source: io::Error::last_os_error() });
        }
        Ok(())
    }

    /// Registers `fd` for the given interest.
    pub fn add(&self, fd: RawFd, interest: Interest) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, Some(interest))
    }

    /// Changes the registered interest for `fd`.
    pub fn modify(&self, fd: RawFd, interest: Interest) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, Some(interest))
    }

    /// Deregisters `fd`. A descriptor already removed (or never added,
    /// e.g. because connect failed before registration) is not an error
    /// — callers routinely call this during teardown without tracking
    /// whether registration ever succeeded.
    pub fn delete(&self, fd: RawFd) {
        let _ = self.ctl(libc::EPOLL_CTL_DEL, fd, None);
    }

    /// Blocks until at least one event is ready, or `timeout_ms` elapses
    /// (`-1` waits indefinitely). `EINTR` is retried transparently, since
    /// it is routine under signal delivery rather than a real failure.
    pub fn wait(&self, buf: &mut [libc::epoll_event], timeout_ms: i32) -> Result<Vec<Event>> {
        loop {
            let n = unsafe {
                libc::epoll_wait(self.fd, buf.as_mut_ptr(), buf.len() as i32, timeout_ms)
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(NetError::EpollWait(err));
            }
            return Ok(buf[..n as usize]
                .iter()
                .map(|ev| Event { fd: ev.u64 as RawFd, mask: ev.events })
                .collect());
        }
    }

    /// The raw descriptor, for registering the listening socket before
    /// the reactor's main loop starts.
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// Sets `fd` to non-blocking mode via `fcntl`.
pub fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(NetError::NonBlocking { fd, source: io::Error::last_os_error() });
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(NetError::NonBlocking { fd, source: io::Error::last_os_error() });
    }
    Ok(())
}
