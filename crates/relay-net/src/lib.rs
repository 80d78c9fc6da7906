//! relay-net: edge-triggered I/O reactor, worker pool, connection table,
//! and per-event connection handler shared by the origin server and the
//! forwarding proxy.
//!
//! Everything here talks directly to raw POSIX descriptors and
//! `epoll`. The two binaries differ only in the [`handler::Role`] they
//! hand to [`reactor::Reactor::bind`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod epoll;
pub mod error;
pub mod handler;
pub mod pool;
pub mod reactor;
pub mod table;
pub mod upstream;

pub use epoll::{Epoll, Event, Interest};
pub use error::NetError;
pub use handler::{ConnectionHandler, RequestRouter, Role};
pub use pool::WorkerPool;
pub use reactor::Reactor;
pub use table::{ConnectionContext, ConnectionTable, SharedContext};
pub use upstream::{connect_nonblocking, UpstreamTarget};
