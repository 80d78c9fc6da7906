//! Error types for relay-config.

use thiserror::Error;

/// Errors raised while validating command-line configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `--ip` did not parse as an IPv4 or IPv6 address.
    #[error("invalid listen address {0:?}")]
    InvalidIp(String),

    /// `--proxy` did not parse as a `scheme://host[:port][/path]` URL.
    #[error("invalid upstream URL {0:?}: {1}")]
    InvalidProxyUrl(String, String),

    /// The platform could not report a CPU count for `--threads 0` ("auto").
    #[error("could not determine available parallelism: {0}")]
    ParallelismUnavailable(#[source] std::io::Error),
}

/// Result type alias using [`ConfigError`].
pub type Result<T> = std::result::Result<T, ConfigError>;
