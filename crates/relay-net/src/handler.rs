//! Per-event connection state machine.
//!
//! The origin server and the proxy differ only in what happens once a
//! request has been fully parsed off the client side — that is exactly
//! where [`Role`] branches below. Everything else (drain-to-`EAGAIN`
//! reads, writable draining, error/hangup teardown) is shared between
//! both roles.
//!
//! Queuing a response or a forwarded request onto an output buffer does
//! not by itself generate a writable readiness event, so the readable
//! path always flushes opportunistically through the same
//! [`ConnectionHandler::flush_output`] a real writable event uses,
//! rather than waiting for one.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use relay_core::{HttpRequest, Outcome, RequestParser};

use crate::epoll::{Epoll, Interest};
use crate::table::{ConnectionContext, ConnectionTable, SharedContext};
use crate::upstream::{connect_nonblocking, UpstreamTarget};

/// Turns a parsed request into framed response bytes for the origin
/// server role (§4.7). Implemented by `relay-origin`'s router; this
/// crate only needs the seam.
pub trait RequestRouter: Send + Sync {
    /// Produces the fully framed HTTP/1.1 response for `request`.
    fn route(&self, request: &HttpRequest) -> Vec<u8>;
}

/// Which role this handler's connections play, and the role-specific
/// collaborator each needs.
pub enum Role {
    /// Origin server: parsed requests are dispatched to a router.
    Origin(Arc<dyn RequestRouter>),
    /// Forwarding proxy: parsed requests are re-serialized and bridged
    /// to a single upstream target.
    Proxy(UpstreamTarget),
}

/// Executes accept and I/O events for one reactor's connections.
///
/// Shared by the reactor thread (which only calls [`ConnectionHandler::accept_all`]
/// indirectly through a task) and the worker pool (which calls
/// [`ConnectionHandler::handle_event`] for every non-listener event).
pub struct ConnectionHandler {
    table: Arc<ConnectionTable>,
    epoll: Arc<Epoll>,
    role: Role,
}

enum ReadOutcome {
    Continue,
    Closed,
}

enum WriteOutcome {
    Continue,
    Closed,
}

impl ConnectionHandler {
    /// Builds a handler for the given table, multiplexer, and role.
    pub fn new(table: Arc<ConnectionTable>, epoll: Arc<Epoll>, role: Role) -> Self {
        Self { table, epoll, role }
    }

    /// Accept task (§4.5): repeatedly `accept4`s off `listen_fd` until
    /// `EAGAIN`, registering each new client non-blocking and
    /// read-only-edge-triggered.
    pub fn accept_all(&self, listen_fd: RawFd) {
        loop {
            let client_fd = unsafe { libc::accept4(listen_fd, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_NONBLOCK) };
            if client_fd < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::WouldBlock {
                    tracing::warn!(error = %err, "accept failed");
                }
                return;
            }

            let ctx: SharedContext = Arc::new(std::sync::Mutex::new(ConnectionContext::new(client_fd)));
            self.table.insert(client_fd, ctx);
            if let Err(e) = self.epoll.add(client_fd, Interest::ReadOnly) {
                tracing::warn!(fd = client_fd, error = %e, "failed to register accepted connection");
                self.table.remove(client_fd);
                continue;
            }
            tracing::debug!(fd = client_fd, "accepted connection");
        }
    }

    /// I/O task (§4.6): handles one readiness event for `fd`.
    pub fn handle_event(&self, fd: RawFd, mask: u32) {
        let Some(ctx_arc) = self.table.get(fd) else {
            tracing::debug!(fd, "event for fd with no registered context, dropping");
            return;
        };
        let mut ctx = ctx_arc.lock().expect("connection context mutex poisoned");

        if mask & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0 {
            tracing::debug!(fd, "error/hangup event");
            self.teardown(&ctx);
            return;
        }

        if mask & libc::EPOLLIN as u32 != 0 {
            if let ReadOutcome::Closed = self.handle_readable(&ctx_arc, &mut ctx, fd) {
                self.teardown(&ctx);
                return;
            }
        }

        if mask & libc::EPOLLOUT as u32 != 0 {
            if let WriteOutcome::Closed = self.handle_writable(&mut ctx, fd) {
                self.teardown(&ctx);
            }
        }
    }

    fn handle_readable(&self, ctx_arc: &SharedContext, ctx: &mut ConnectionContext, fd: RawFd) -> ReadOutcome {
        let is_client = fd == ctx.client_fd;
        let is_upstream = ctx.upstream_fd == Some(fd);
        if !is_client && !is_upstream {
            tracing::error!(fd, "readable event for fd matching neither side of its connection");
            return ReadOutcome::Continue;
        }

        let target = if is_client { &mut ctx.in_buf } else { &mut ctx.upstream_in_buf };
        match drain_readable(fd, target) {
            Ok(true) => return ReadOutcome::Closed,
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(fd, error = %e, "read error");
                return ReadOutcome::Closed;
            }
        }

        if is_client {
            self.drain_client_requests(ctx_arc, ctx, fd)
        } else {
            self.bridge_upstream_to_client(ctx)
        }
    }

    fn drain_client_requests(&self, ctx_arc: &SharedContext, ctx: &mut ConnectionContext, fd: RawFd) -> ReadOutcome {
        loop {
            match RequestParser::parse(ctx.in_buf.view()) {
                Outcome::Complete { message, consumed } => {
                    ctx.in_buf.consume(consumed);
                    ctx.keep_alive = message.keep_alive;
                    ctx.pipeline.push_back(message);
                }
                Outcome::NeedMore => break,
                Outcome::Bad => {
                    tracing::debug!(fd, "malformed request, closing connection");
                    return ReadOutcome::Closed;
                }
            }
        }

        while let Some(request) = ctx.pipeline.pop_front() {
            match &self.role {
                Role::Origin(router) => {
                    let response = router.route(&request);
                    // The router always frames `Connection: close` (§4.7);
                    // the parsed keep-alive hint is overridden accordingly.
                    ctx.keep_alive = false;
                    ctx.out_buf.append(&response);
                }
                Role::Proxy(target) => {
                    if ctx.upstream_fd.is_none() {
                        match self.establish_upstream(ctx_arc, ctx, target) {
                            Ok(()) => {}
                            Err(e) => {
                                tracing::warn!(fd, error = %e, "failed to connect upstream");
                                return ReadOutcome::Closed;
                            }
                        }
                    }
                    let wire = request.to_wire_bytes();
                    ctx.upstream_out_buf.append(&wire);
                }
            }
        }

        match &self.role {
            Role::Origin(_) => into_read_outcome(self.flush_output(ctx, fd)),
            Role::Proxy(_) => match ctx.upstream_fd {
                Some(upstream_fd) => into_read_outcome(self.flush_output(ctx, upstream_fd)),
                None => ReadOutcome::Continue,
            },
        }
    }

    fn establish_upstream(
        &self,
        ctx_arc: &SharedContext,
        ctx: &mut ConnectionContext,
        target: &UpstreamTarget,
    ) -> crate::error::Result<()> {
        let upstream_fd = connect_nonblocking(target)?;
        ctx.upstream_fd = Some(upstream_fd);
        self.table.insert(upstream_fd, Arc::clone(ctx_arc));
        self.epoll.add(upstream_fd, Interest::ReadWrite)?;
        Ok(())
    }

    fn bridge_upstream_to_client(&self, ctx: &mut ConnectionContext) -> ReadOutcome {
        let bytes = ctx.upstream_in_buf.drain();
        ctx.out_buf.append(&bytes);
        let client_fd = ctx.client_fd;
        into_read_outcome(self.flush_output(ctx, client_fd))
    }

    fn handle_writable(&self, ctx: &mut ConnectionContext, fd: RawFd) -> WriteOutcome {
        self.flush_output(ctx, fd)
    }

    /// Writes as much of `fd`'s output buffer as the kernel will accept
    /// right now, then re-arms interest for whatever remains.
    ///
    /// Called both from an actual writable event (`handle_writable`) and
    /// opportunistically right after a readable event queues fresh
    /// output (`drain_client_requests`, `bridge_upstream_to_client`) —
    /// under edge-triggered notification a freshly queued response would
    /// otherwise sit unwritten until some unrelated event arrived, since
    /// queuing bytes does not itself generate a writable event.
    fn flush_output(&self, ctx: &mut ConnectionContext, fd: RawFd) -> WriteOutcome {
        let is_client = fd == ctx.client_fd;
        let is_upstream = ctx.upstream_fd == Some(fd);
        if !is_client && !is_upstream {
            tracing::error!(fd, "flush requested for fd matching neither side of its connection");
            return WriteOutcome::Continue;
        }

        let buf = if is_client { &mut ctx.out_buf } else { &mut ctx.upstream_out_buf };
        if let Err(e) = drain_writable(fd, buf) {
            tracing::debug!(fd, error = %e, "write error");
            return WriteOutcome::Closed;
        }

        if buf.is_empty() {
            let _ = self.epoll.modify(fd, Interest::ReadOnly);
            if is_client && matches!(self.role, Role::Origin(_)) && !ctx.keep_alive {
                return WriteOutcome::Closed;
            }
        } else {
            let _ = self.epoll.modify(fd, Interest::ReadWrite);
        }

        WriteOutcome::Continue
    }

    fn teardown(&self, ctx: &ConnectionContext) {
        self.epoll.delete(ctx.client_fd);
        self.table.remove(ctx.client_fd);
        if let Some(upstream_fd) = ctx.upstream_fd {
            self.epoll.delete(upstream_fd);
            self.table.remove(upstream_fd);
        }
    }
}

/// Folds a [`WriteOutcome`] from an opportunistic post-read flush into
/// the [`ReadOutcome`] the readable path returns.
fn into_read_outcome(outcome: WriteOutcome) -> ReadOutcome {
    match outcome {
        WriteOutcome::Continue => ReadOutcome::Continue,
        WriteOutcome::Closed => ReadOutcome::Closed,
    }
}

/// Reads `fd` until `EAGAIN`, appending everything read to `target`.
///
/// Returns `Ok(true)` if the peer closed its write side (`read` returned
/// `0`), `Ok(false)` once drained to `EAGAIN`, `Err` on any other error.
/// Edge-triggered notification requires draining fully on every readable
/// event (§4.6 step 1) — a short read does not imply no more data is
/// available.
fn drain_readable(fd: RawFd, target: &mut relay_core::ByteBuffer) -> io::Result<bool> {
    let mut scratch = [0u8; 4096];
    loop {
        let n = unsafe { libc::read(fd, scratch.as_mut_ptr() as *mut libc::c_void, scratch.len()) };
        if n > 0 {
            target.append(&scratch[..n as usize]);
            continue;
        }
        if n == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(false);
        }
        return Err(err);
    }
}

/// Writes as much of `buf` as the kernel will currently accept, stopping
/// at `EAGAIN`. The buffer is left non-empty if the kernel's send
/// buffer fills before everything is written; the caller re-arms write
/// interest and the next writable event resumes draining.
fn drain_writable(fd: RawFd, buf: &mut relay_core::ByteBuffer) -> io::Result<()> {
    while !buf.is_empty() {
        let view = buf.view();
        let n = unsafe { libc::write(fd, view.as_ptr() as *const libc::c_void, view.len()) };
        if n >= 0 {
            buf.consume(n as usize);
            continue;
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}
