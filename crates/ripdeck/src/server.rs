//! Station entry point: the panel listener and the ops HTTP listener.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::StationConfig;
use crate::ops;
use crate::session;
use crate::station::Station;

/// Bind both listeners and serve until a shutdown signal arrives.
pub async fn serve(config: StationConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("create output directory {}", config.output_dir.display()))?;

    let control = TcpListener::bind(config.control_addr)
        .await
        .with_context(|| format!("bind control listener {}", config.control_addr))?;
    let ops_listener = TcpListener::bind(config.ops_addr)
        .await
        .with_context(|| format!("bind ops listener {}", config.ops_addr))?;

    let station = Arc::new(Station::new(config));
    run_with_listeners(station, control, ops_listener).await
}

async fn run_with_listeners(
    station: Arc<Station>,
    control: TcpListener,
    ops_listener: TcpListener,
) -> anyhow::Result<()> {
    info!(
        control = %control.local_addr()?,
        ops = %ops_listener.local_addr()?,
        "Station listening"
    );

    let root_token = CancellationToken::new();
    let ops_token = root_token.clone();
    let ops_router = ops::routes(Arc::clone(&station));
    let ops_task = tokio::spawn(async move {
        axum::serve(ops_listener, ops_router)
            .with_graceful_shutdown(async move { ops_token.cancelled().await })
            .await
    });

    let mut sessions = JoinSet::new();
    let shutdown = shutdown_signal(station.shutdown_rx());
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            accepted = control.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!(%addr, "Panel connected");
                    stream.set_nodelay(true).ok();
                    sessions.spawn(session::run(
                        Arc::clone(&station),
                        stream,
                        root_token.child_token(),
                    ));
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            },
        }
    }

    info!(sessions = sessions.len(), "Draining sessions");
    root_token.cancel();
    while let Some(result) = sessions.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "Session task panicked");
        }
    }
    ops_task.await.context("ops server task")??;
    info!("Station shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM, SIGINT, or the /shutdown endpoint).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This can only happen if:
/// - Called from a non-main thread without the runtime being properly configured
/// - The tokio runtime is not properly initialized
///
/// These are unrecoverable configuration errors that should fail fast at startup.
async fn shutdown_signal(mut shutdown_rx: watch::Receiver<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let explicit_shutdown = async {
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = explicit_shutdown => {
            info!("Shutdown requested via /shutdown endpoint...");
        }
    }
}
