//! The connection table and the per-connection context it owns.
//!
//! A proxy connection is keyed by both its `client_fd` and its
//! `upstream_fd`, aliasing the same context under two keys. Each table
//! entry is independently `remove`-able exactly once — `HashMap::remove`
//! is already idempotent per key — and the context's buffers are freed
//! by ordinary `Arc` refcounting once the last of its (at most two) keys
//! is gone.

use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use relay_core::{ByteBuffer, HttpRequest};

/// The unit of ownership for one active connection (§3).
///
/// For the origin server role `upstream_fd`, `upstream_in_buf`, and
/// `upstream_out_buf` are never populated. For the proxy role they come
/// into use once the first request on the connection has been parsed.
#[derive(Debug)]
pub struct ConnectionContext {
    /// The client-facing descriptor, valid for the lifetime of the entry
    /// keyed under it.
    pub client_fd: RawFd,
    /// The upstream descriptor, once connected (proxy role only).
    pub upstream_fd: Option<RawFd>,
    /// Bytes read from the client not yet fully parsed.
    pub in_buf: ByteBuffer,
    /// Bytes queued to write to the client.
    pub out_buf: ByteBuffer,
    /// Bytes read from the upstream not yet bridged to the client.
    pub upstream_in_buf: ByteBuffer,
    /// Bytes queued to write to the upstream.
    pub upstream_out_buf: ByteBuffer,
    /// Parsed requests not yet responded to / forwarded.
    pub pipeline: VecDeque<HttpRequest>,
    /// Whether the connection should stay open after the in-flight
    /// response, per the last parsed request's `Connection` handling.
    pub keep_alive: bool,
}

impl ConnectionContext {
    /// Builds a fresh context for a newly accepted client connection.
    pub fn new(client_fd: RawFd) -> Self {
        Self {
            client_fd,
            upstream_fd: None,
            in_buf: ByteBuffer::new(),
            out_buf: ByteBuffer::new(),
            upstream_in_buf: ByteBuffer::new(),
            upstream_out_buf: ByteBuffer::new(),
            pipeline: VecDeque::new(),
            keep_alive: true,
        }
    }
}

/// A connection context shared between the client-side and upstream-side
/// I/O tasks that may touch it. The `Mutex` enforces per-context
/// exclusion: whichever task locks it first finishes its
/// read/write/parse step before the other proceeds.
pub type SharedContext = Arc<Mutex<ConnectionContext>>;

/// Thread-safe `fd -> ConnectionContext` mapping.
///
/// A proxy context is reachable under two keys (`client_fd` and, once
/// established, `upstream_fd`); both `Arc`s point at the same
/// `Mutex<ConnectionContext>`.
#[derive(Default)]
pub struct ConnectionTable {
    inner: Mutex<HashMap<RawFd, SharedContext>>,
}

impl ConnectionTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `ctx` under `fd`. Used both for a connection's primary
    /// key (`client_fd`, on accept) and its secondary key (`upstream_fd`,
    /// once the proxy connects upstream) — callers pass a clone of the
    /// same `Arc` for the latter.
    pub fn insert(&self, fd: RawFd, ctx: SharedContext) {
        let mut map = self.inner.lock().expect("connection table mutex poisoned");
        map.insert(fd, ctx);
    }

    /// Looks up the context registered for `fd`, if any.
    pub fn get(&self, fd: RawFd) -> Option<SharedContext> {
        let map = self.inner.lock().expect("connection table mutex poisoned");
        map.get(&fd).cloned()
    }

    /// Removes the entry for `fd` and closes that descriptor.
    ///
    /// Safe to call twice for the same `fd` (the second call is a no-op)
    /// and safe to call once per side of a proxy context without
    /// double-closing either descriptor, since each key owns exactly one
    /// OS descriptor and `HashMap::remove` only succeeds the first time.
    /// The `ConnectionContext` itself (its buffers and pipeline) is freed
    /// once the last `Arc` referencing it — i.e. the last of its at most
    /// two table entries — is dropped.
    pub fn remove(&self, fd: RawFd) {
        let mut map = self.inner.lock().expect("connection table mutex poisoned");
        if map.remove(&fd).is_some() {
            unsafe {
                libc::close(fd);
            }
        }
    }

    /// Removes and closes every entry. Used during shutdown.
    pub fn clear(&self) {
        let mut map = self.inner.lock().expect("connection table mutex poisoned");
        for fd in map.keys() {
            unsafe {
                libc::close(*fd);
            }
        }
        map.clear();
    }

    /// Number of registered entries (not distinct connections — a proxy
    /// connection with both sides established counts twice). Exposed for
    /// tests and diagnostics.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("connection table mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(fd: RawFd) -> SharedContext {
        Arc::new(Mutex::new(ConnectionContext::new(fd)))
    }

    #[test]
    fn insert_then_get_round_trips() {
        let table = ConnectionTable::new();
        let c = ctx(7);
        table.insert(7, Arc::clone(&c));
        assert!(table.get(7).is_some());
        assert!(table.get(8).is_none());
        // Avoid actually closing fd 7, which isn't a real descriptor in
        // this test; drop the table's own bookkeeping without invoking
        // `remove`'s `libc::close`.
        std::mem::forget(table);
    }

    #[test]
    fn second_removal_of_same_fd_is_a_silent_no_op() {
        let table = ConnectionTable::new();
        // Use a real, harmless fd (a duplicate of stdin) so close(2) has
        // something valid to act on without disturbing the test process.
        let fd = unsafe { libc::dup(0) };
        table.insert(fd, ctx(fd));
        assert_eq!(table.len(), 1);
        table.remove(fd);
        assert_eq!(table.len(), 0);
        // Removing again must not attempt to close `fd` a second time.
        table.remove(fd);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn proxy_context_survives_under_either_key_until_both_removed() {
        let table = ConnectionTable::new();
        let client_fd = unsafe { libc::dup(0) };
        let upstream_fd = unsafe { libc::dup(0) };
        let shared = ctx(client_fd);
        table.insert(client_fd, Arc::clone(&shared));
        table.insert(upstream_fd, Arc::clone(&shared));
        assert_eq!(table.len(), 2);

        table.remove(client_fd);
        assert_eq!(table.len(), 1);
        assert!(table.get(upstream_fd).is_some());

        table.remove(upstream_fd);
        assert_eq!(table.len(), 0);
    }
}
