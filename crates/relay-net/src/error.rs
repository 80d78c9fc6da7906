//! Error types for relay-net.

use thiserror::Error;

/// Errors raised by the reactor, worker pool, and upstream connector.
///
/// These are startup-fatal failures: bind, listen, epoll setup, and
/// pool creation all surface through this type so a binary's `main` can
/// report them on stderr and exit nonzero.
#[derive(Error, Debug)]
pub enum NetError {
    /// `socket(2)` failed.
    #[error("failed to create socket: {0}")]
    Socket(#[source] std::io::Error),

    /// `bind(2)` failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that failed to bind.
        addr: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// `listen(2)` failed.
    #[error("failed to listen: {0}")]
    Listen(#[source] std::io::Error),

    /// `epoll_create1(2)` failed.
    #[error("failed to create epoll instance: {0}")]
    EpollCreate(#[source] std::io::Error),

    /// `epoll_ctl(2)` failed.
    #[error("epoll_ctl failed for fd {fd}: {source}")]
    EpollCtl {
        /// Descriptor the operation targeted.
        fd: i32,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// `epoll_wait(2)` failed (other than `EINTR`, which is retried).
    #[error("epoll_wait failed: {0}")]
    EpollWait(#[source] std::io::Error),

    /// `fcntl(2)` failed while switching a descriptor to non-blocking mode.
    #[error("failed to set fd {fd} non-blocking: {source}")]
    NonBlocking {
        /// Descriptor the operation targeted.
        fd: i32,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Name resolution for an upstream host failed.
    #[error("failed to resolve upstream {host}:{port}: {source}")]
    Resolve {
        /// Host that failed to resolve.
        host: String,
        /// Port requested.
        port: u16,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A non-blocking `connect(2)` to an upstream failed outright (not
    /// `EINPROGRESS`).
    #[error("failed to connect upstream {host}:{port}: {source}")]
    Connect {
        /// Host that refused the connection.
        host: String,
        /// Port requested.
        port: u16,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A task was submitted to a [`crate::pool::WorkerPool`] that has
    /// already been stopped.
    #[error("worker pool has been stopped; task rejected")]
    PoolStopped,
}

/// Result type alias using [`NetError`].
pub type Result<T> = std::result::Result<T, NetError>;
