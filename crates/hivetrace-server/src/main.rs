use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hivetrace_server::config::ServerConfig;
use hivetrace_server::{build_state, routes, spawn_workers};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    let bind_addr = config.bind_addr.clone();
    info!(storage = %config.storage_dir.display(), "starting hivetrace server");

    let state = build_state(config).await?;
    let workers = spawn_workers(&state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "listening");

    let app = routes::router(state.clone());
    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            // Close subscriber streams so graceful shutdown can finish
            let _ = shutdown.send(true);
        })
        .await
        .context("server error")?;

    for handle in workers {
        handle.abort();
    }

    // Flush the WAL so a cold start reads a compact file
    {
        let db = state.db.lock().expect("db lock");
        if let Err(e) = db.checkpoint() {
            tracing::warn!(error = %e, "wal checkpoint on shutdown failed");
        }
    }

    info!("bye");
    Ok(())
}
