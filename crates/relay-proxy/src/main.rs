//! relay-proxy: a forwarding HTTP/1.1 reverse proxy with a single
//! upstream target.
//!
//! Parse flags (including the upstream URL), set up logging, bind, run.
//! Shares its reactor and connection handler entirely with
//! `relay-origin` — only the [`Role`] differs.

use std::net::SocketAddr;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use relay_config::{ProxyArgs, ProxySettings};
use relay_net::{Reactor, Role, UpstreamTarget};

fn main() -> anyhow::Result<()> {
    let args = parse_args();
    let settings = args.validate().context("invalid command-line arguments")?;

    init_logging(&settings.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting relay-proxy");

    if let Err(e) = run(settings) {
        tracing::error!(error = %e, "relay-proxy exited with an error");
        return Err(e);
    }

    Ok(())
}

/// Parses `ProxyArgs`, forcing exit code 1 on a usage error (missing or
/// malformed flags) rather than clap's default of 2 — §6 requires "exit
/// 1 with a usage line on stderr" for bad startup arguments. `--help`
/// and `--version` keep clap's own exit code of 0.
fn parse_args() -> ProxyArgs {
    match ProxyArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.exit();
            }
            let _ = e.print();
            std::process::exit(1);
        }
    }
}

fn run(settings: ProxySettings) -> anyhow::Result<()> {
    let addr = SocketAddr::new(settings.ip, settings.port);
    let target = UpstreamTarget::parse(&settings.proxy)
        .with_context(|| format!("invalid upstream url {:?}", settings.proxy))?;

    tracing::info!(%addr, upstream = %settings.proxy, threads = settings.threads, "binding listener");
    let reactor = Reactor::bind(addr, settings.threads, Role::Proxy(target))
        .with_context(|| format!("failed to bind {addr}"))?;

    reactor.run().context("reactor loop failed")?;
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
