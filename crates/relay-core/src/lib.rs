//! relay-core: byte buffer and incremental HTTP/1.1 parser.
//!
//! This crate contains the performance-critical, allocation-light code
//! shared by both the origin server and the proxy: a growable FIFO byte
//! buffer and a parser that tolerates partial reads and pipelined
//! messages.
//!
//! # Invariants
//!
//! 1. No blocking I/O in this crate — it only ever touches in-memory bytes.
//! 2. A malformed message is routine input, not a program error: parse
//!    failure is reported through [`parser::Outcome::Bad`], not `Result`.
//! 3. No panics on attacker-controlled input.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod message;
pub mod parser;

pub use buffer::ByteBuffer;
pub use message::{HeaderMap, HttpRequest, HttpResponse};
pub use parser::{Outcome, RequestParser, ResponseParser};
