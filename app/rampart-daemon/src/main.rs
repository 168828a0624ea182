//! rampartd — hosts the packet-filter engine.
//!
//! Binds the control socket the administration CLI talks to, drives the
//! periodic connection-table sweep, and tears the engine down on
//! ctrl-c/SIGTERM. The datapath hooks themselves are library entry
//! points; the host network stack calls them directly.

mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rampart_engine::{Engine, EngineConfig};
use tokio::net::UnixListener;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default control socket path.
const DEFAULT_SOCKET: &str = "/run/rampart.sock";

#[derive(Debug, Parser)]
#[command(name = "rampartd")]
#[command(author, version, about, long_about = None)]
struct DaemonArgs {
    /// Control socket path.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Seconds between connection-table sweeps.
    #[arg(long)]
    sweep_interval: Option<u64>,

    /// Seconds a flow lives past its last activity.
    #[arg(long)]
    conn_ttl: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rampart=info,rampartd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(DaemonArgs::parse()).await
}

async fn run(args: DaemonArgs) -> Result<()> {
    let mut config = EngineConfig::default();
    if let Some(secs) = args.sweep_interval {
        config.sweep_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = args.conn_ttl {
        config.conn_ttl = Duration::from_secs(secs);
    }
    let engine = Arc::new(Engine::new(config));

    let socket_path = args.socket.unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET));
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path).context(format!(
        "Failed to bind control socket: {}",
        socket_path.display()
    ))?;
    info!(socket = %socket_path.display(), "control socket listening");

    let sweeper = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config().sweep_interval);
            loop {
                interval.tick().await;
                let expired = engine.sweep();
                if expired > 0 {
                    debug!(expired, "sweep retired flows");
                }
            }
        })
    };

    let control = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(err) = server::serve(engine, listener).await {
                tracing::error!("control server error: {}", err);
            }
        })
    };

    println!("rampart daemon started");
    println!("  control socket: {}", socket_path.display());
    println!("Press Ctrl+C to stop.");

    shutdown_signal().await;
    info!("shutdown signal received");

    control.abort();
    sweeper.abort();
    engine.shutdown();

    if let Err(err) = std::fs::remove_file(&socket_path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove socket {}: {}", socket_path.display(), err);
        }
    }

    info!("rampart daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
