//! webverse-daemon: WebVerse connection broker.
//!
//! Listens for secure WebSocket connections from the main application, its
//! runtime tabs and the settings page, identifies each client, and forwards
//! requests from dependent clients to their owning main application.

mod broker;
mod certificate;
mod config;
mod discovery;
mod handshake;
mod server;
mod transport;

use clap::Parser;
use config::{CliOverrides, DaemonConfig};
use discovery::DiscoveryFiles;
use server::DaemonServer;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// webverse-daemon: WebVerse connection broker
#[derive(Parser, Debug)]
#[command(name = "webverse-daemon", version, about = "WebVerse connection broker")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.webverse/daemon.toml")]
    config: String,

    /// Listen port (0 picks a free port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Directory for the PID, port and certificate files
    #[arg(long)]
    discovery_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        port: cli.port,
        bind: cli.bind.clone(),
        discovery_dir: cli.discovery_dir.clone(),
    };
    let daemon_config = match DaemonConfig::load(Some(Path::new(&cli.config)), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("webverse-daemon: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&cli.log_level, daemon_config.log_file.as_deref());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %daemon_config.bind,
        port = daemon_config.port,
        "starting webverse-daemon"
    );

    let bundle = match certificate::generate(&daemon_config.hostname) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to generate certificate");
            std::process::exit(1);
        }
    };
    info!(common_name = %bundle.common_name, "generated self-signed certificate");

    let listener = match TcpListener::bind((daemon_config.bind, daemon_config.port)).await {
        Ok(l) => l,
        Err(e) => {
            error!(
                bind = %daemon_config.bind,
                port = daemon_config.port,
                error = %e,
                "failed to bind listener"
            );
            std::process::exit(1);
        }
    };
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            error!(error = %e, "failed to read listener address");
            std::process::exit(1);
        }
    };

    let files = match DiscoveryFiles::write(
        &daemon_config.discovery_dir,
        std::process::id(),
        port,
        &bundle.cert_pem,
    ) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "failed to write discovery files");
            std::process::exit(1);
        }
    };

    let tls_config = match certificate::server_config(&bundle) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to build TLS config");
            files.remove();
            std::process::exit(1);
        }
    };

    let daemon = DaemonServer::new(daemon_config.heartbeat);

    let mut exit_code = 0;
    tokio::select! {
        result = daemon.run(listener, tls_config) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                exit_code = 1;
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    files.remove();
    info!("webverse-daemon stopped");

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Install stderr logging plus, when configured, a log file.
///
/// The returned guard flushes the file writer on drop.
fn init_logging(level: &str, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "daemon.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(file_layer)
        .init();

    guard
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
