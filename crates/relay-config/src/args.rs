//! Command-line argument structs, one per binary.

use std::net::IpAddr;

use clap::Parser;

use crate::error::{ConfigError, Result};

/// Resolves a `--threads` value against the host's CPU count.
///
/// `0` is treated as "unset" / "auto" — `--threads` is a required flag, so
/// `0` is the explicit spelling of "let the platform decide" rather than
/// leaving the flag off entirely.
pub struct WorkerCount;

impl WorkerCount {
    /// Resolves `requested` to a concrete worker count, falling back to
    /// [`std::thread::available_parallelism`] when `requested == 0`.
    ///
    /// The minimum is 2 workers, matching the original thread pool's
    /// floor when the platform reports only a single hardware thread.
    pub fn resolve(requested: usize) -> Result<usize> {
        if requested > 0 {
            return Ok(requested);
        }
        let auto = std::thread::available_parallelism().map_err(ConfigError::ParallelismUnavailable)?;
        Ok(auto.get().max(2))
    }
}

/// Raw command-line flags for the origin server.
#[derive(Parser, Debug)]
#[command(name = "relay-origin")]
#[command(author, version, about = "Origin HTTP/1.1 server", long_about = None)]
pub struct ServerArgs {
    /// Address to listen on.
    #[arg(long)]
    pub ip: String,

    /// Port to listen on.
    #[arg(long)]
    pub port: u16,

    /// Worker thread count (0 = use available parallelism).
    #[arg(long)]
    pub threads: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Validated, ready-to-use origin server configuration.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Listen address.
    pub ip: IpAddr,
    /// Listen port.
    pub port: u16,
    /// Resolved worker count.
    pub threads: usize,
    /// Log level passed through to the logging subscriber.
    pub log_level: String,
}

impl ServerArgs {
    /// Validates raw flags into [`ServerSettings`].
    pub fn validate(self) -> Result<ServerSettings> {
        let ip = self.ip.parse::<IpAddr>().map_err(|_| ConfigError::InvalidIp(self.ip.clone()))?;
        let threads = WorkerCount::resolve(self.threads)?;
        Ok(ServerSettings { ip, port: self.port, threads, log_level: self.log_level })
    }
}

/// Raw command-line flags for the forwarding proxy.
#[derive(Parser, Debug)]
#[command(name = "relay-proxy")]
#[command(author, version, about = "Forwarding HTTP/1.1 reverse proxy", long_about = None)]
pub struct ProxyArgs {
    /// Address to listen on.
    #[arg(long)]
    pub ip: String,

    /// Port to listen on.
    #[arg(long)]
    pub port: u16,

    /// Worker thread count (0 = use available parallelism).
    #[arg(long)]
    pub threads: usize,

    /// Upstream URL, e.g. `http://127.0.0.1:8888`.
    #[arg(long)]
    pub proxy: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Validated, ready-to-use proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Listen address.
    pub ip: IpAddr,
    /// Listen port.
    pub port: u16,
    /// Resolved worker count.
    pub threads: usize,
    /// Upstream URL, validated only for gross shape here; host/port
    /// extraction happens in `relay-net::upstream`.
    pub proxy: String,
    /// Log level passed through to the logging subscriber.
    pub log_level: String,
}

impl ProxyArgs {
    /// Validates raw flags into [`ProxySettings`].
    pub fn validate(self) -> Result<ProxySettings> {
        let ip = self.ip.parse::<IpAddr>().map_err(|_| ConfigError::InvalidIp(self.ip.clone()))?;
        let threads = WorkerCount::resolve(self.threads)?;
        let scheme_end = self.proxy.find("://").ok_or_else(|| {
            ConfigError::InvalidProxyUrl(self.proxy.clone(), "missing scheme".to_string())
        })?;
        let host_part = &self.proxy[scheme_end + 3..];
        if host_part.trim_start_matches('/').is_empty() {
            return Err(ConfigError::InvalidProxyUrl(self.proxy.clone(), "missing host".to_string()));
        }
        Ok(ProxySettings { ip, port: self.port, threads, proxy: self.proxy, log_level: self.log_level })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_passthrough_when_nonzero() {
        assert_eq!(WorkerCount::resolve(7).unwrap(), 7);
    }

    #[test]
    fn worker_count_auto_resolves_to_at_least_two() {
        assert!(WorkerCount::resolve(0).unwrap() >= 2);
    }

    #[test]
    fn server_args_reject_bad_ip() {
        let args = ServerArgs { ip: "not-an-ip".into(), port: 8080, threads: 4, log_level: "info".into() };
        assert!(matches!(args.validate(), Err(ConfigError::InvalidIp(_))));
    }

    #[test]
    fn server_args_accept_valid_input() {
        let args = ServerArgs { ip: "127.0.0.1".into(), port: 8080, threads: 4, log_level: "info".into() };
        let settings = args.validate().unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.threads, 4);
    }

    #[test]
    fn proxy_args_reject_url_without_scheme() {
        let args = ProxyArgs {
            ip: "127.0.0.1".into(),
            port: 9090,
            threads: 4,
            proxy: "127.0.0.1:8888".into(),
            log_level: "info".into(),
        };
        assert!(matches!(args.validate(), Err(ConfigError::InvalidProxyUrl(..))));
    }

    #[test]
    fn proxy_args_accept_valid_url() {
        let args = ProxyArgs {
            ip: "0.0.0.0".into(),
            port: 9090,
            threads: 0,
            proxy: "http://127.0.0.1:8888".into(),
            log_level: "info".into(),
        };
        let settings = args.validate().unwrap();
        assert_eq!(settings.proxy, "http://127.0.0.1:8888");
    }
}
