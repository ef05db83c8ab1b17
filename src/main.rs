//! TideKV server binary.
//!
//! Builds a [`ServerConfig`] from command-line flags, replays the
//! append-only file if enabled, and serves RESP clients over TCP until
//! Ctrl+C.

use anyhow::{anyhow, bail, Context};
use std::sync::Arc;
use tidekv::config::{FsyncPolicy, ServerConfig};
use tidekv::connection::{handle_connection, ConnectionStats};
use tidekv::Server;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

enum Invocation {
    Serve(ServerConfig),
    Help,
    Version,
}

fn next_value<'a>(
    flag: &str,
    args: &mut impl Iterator<Item = &'a String>,
) -> anyhow::Result<&'a String> {
    args.next()
        .ok_or_else(|| anyhow!("{} requires a value", flag))
}

fn parse_args(args: &[String]) -> anyhow::Result<Invocation> {
    let mut config = ServerConfig::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--host" | "-h" => config.host = next_value(arg, &mut iter)?.clone(),
            "--port" | "-p" => {
                config.port = next_value(arg, &mut iter)?
                    .parse()
                    .context("invalid port number")?;
            }
            "--databases" => {
                config.databases = next_value(arg, &mut iter)?
                    .parse()
                    .context("invalid database count")?;
                if config.databases == 0 {
                    bail!("--databases must be at least 1");
                }
            }
            "--appendonly" => {
                config.aof.enabled = match next_value(arg, &mut iter)?.as_str() {
                    "yes" => true,
                    "no" => false,
                    other => bail!("--appendonly expects yes or no, got '{}'", other),
                };
            }
            "--appendfilename" => config.aof.path = next_value(arg, &mut iter)?.into(),
            "--appendfsync" => {
                config.aof.fsync = next_value(arg, &mut iter)?
                    .parse::<FsyncPolicy>()
                    .map_err(|e| anyhow!(e))?;
            }
            "--help" => return Ok(Invocation::Help),
            "--version" | "-v" => return Ok(Invocation::Version),
            other => bail!("unknown argument: {}", other),
        }
    }

    Ok(Invocation::Serve(config))
}

fn print_help() {
    println!(
        r#"
TideKV - In-Memory Multi-Type Key-Value Store

USAGE:
    tidekv [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 6379)
        --databases <N>            Number of databases (default: 16)
        --appendonly <yes|no>      Enable the append-only file (default: no)
        --appendfilename <PATH>    Append-only file path (default: appendonly.aof)
        --appendfsync <POLICY>     always | everysec | no (default: everysec)
    -v, --version                  Print version information
        --help                     Print this help message

Log verbosity follows RUST_LOG (default: info).
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = match parse_args(&args) {
        Ok(Invocation::Serve(config)) => config,
        Ok(Invocation::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Invocation::Version) => {
            println!("TideKV version {}", tidekv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            print_help();
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let server = Arc::new(Server::open(config).context("failed to load the append-only file")?);
    let bind_address = server.config().bind_address();
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    info!(
        version = tidekv::VERSION,
        address = %bind_address,
        databases = server.database_count(),
        "TideKV listening"
    );

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&server), stats) => {}
        result = signal::ctrl_c() => {
            result.context("failed to install Ctrl+C handler")?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    server.shutdown().context("failed to close the append-only file")?;
    info!("Server shutdown complete");
    Ok(())
}

async fn accept_loop(listener: TcpListener, server: Arc<Server>, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let server = Arc::clone(&server);
                let stats = Arc::clone(&stats);
                tokio::spawn(async move {
                    handle_connection(stream, addr, server, stats).await;
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
