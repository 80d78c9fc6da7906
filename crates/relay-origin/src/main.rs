//! relay-origin: a small HTTP/1.1 origin server built on a raw epoll
//! reactor.
//!
//! Parse flags, set up logging, bind, run.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use relay_config::{ServerArgs, ServerSettings};
use relay_net::{Reactor, Role};
use relay_origin::router::OriginRouter;

fn main() -> anyhow::Result<()> {
    let args = parse_args();
    let settings = args.validate().context("invalid command-line arguments")?;

    init_logging(&settings.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting relay-origin");

    if let Err(e) = run(settings) {
        tracing::error!(error = %e, "relay-origin exited with an error");
        return Err(e);
    }

    Ok(())
}

/// Parses `ServerArgs`, forcing exit code 1 on a usage error (missing or
/// malformed flags) rather than clap's default of 2 — §6 requires "exit
/// 1 with a usage line on stderr" for bad startup arguments. `--help`
/// and `--version` keep clap's own exit code of 0.
fn parse_args() -> ServerArgs {
    match ServerArgs::try_parse() {
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

fn run(settings: ServerSettings) -> anyhow::Result<()> {
    let addr = SocketAddr::new(settings.ip, settings.port);
    let router = Arc::new(OriginRouter::new("static", "data"));

    tracing::info!(%addr, threads = settings.threads, "binding listener");
    let reactor = Reactor::bind(addr, settings.threads, Role::Origin(router))
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
