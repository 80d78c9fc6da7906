//! relay-config: command-line argument parsing and validation for the
//! origin server and the proxy.
//!
//! There is no configuration file — both binaries take their full
//! configuration from the command line, validated once here before the
//! reactor and worker pool are ever constructed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod args;
pub mod error;

pub use args::{ProxyArgs, ProxySettings, ServerArgs, ServerSettings, WorkerCount};
pub use error::ConfigError;
