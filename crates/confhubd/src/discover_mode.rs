//! Discover mode: the registry of config servers and clients.
//!
//! 1. Opens the coordination store
//! 2. Rebuilds both registries from it
//! 3. Starts the store watchers and liveness sweeps
//! 4. Serves the discover API

use std::sync::Arc;

use anyhow::Context;
use confhub_api::discover_router;
use confhub_coord::{Coordinator, EmbeddedCoordStore};
use confhub_core::config::DiscoverSettings;
use confhub_discover::DiscoverContext;
use tokio::sync::watch;
use tracing::info;

pub async fn run_discover(settings: DiscoverSettings) -> anyhow::Result<()> {
    info!("confhub discover starting");
    std::fs::create_dir_all(&settings.data_dir)?;

    let db_path = settings.data_dir.join("coord.redb");
    let store = EmbeddedCoordStore::open(&db_path)
        .with_context(|| format!("open coordination store {}", db_path.display()))?;
    info!(path = ?db_path, "coordination store opened");

    let ctx = DiscoverContext::new(Coordinator::new(Arc::new(store)));
    ctx.bootstrap().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = ctx.spawn_background(settings.sweep_interval(), shutdown_rx);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "discover API listening");

    axum::serve(listener, discover_router(ctx))
        .with_graceful_shutdown(crate::shutdown_signal(shutdown_tx))
        .await?;

    for handle in handles {
        let _ = handle.await;
    }
    info!("confhub discover stopped");
    Ok(())
}
