//! Server mode: a config server.
//!
//! 1. Opens the state store
//! 2. Starts the connected-instance sweep
//! 3. Binds the API, then registers with discover (fatal on failure)
//! 4. Heartbeats to discover until shutdown, then reports offline

use std::sync::Arc;

use anyhow::Context;
use confhub_api::server_router;
use confhub_core::DiscoverClient;
use confhub_core::config::ServerSettings;
use confhub_server::{ServerContext, ServerRegistration};
use confhub_state::StateStore;
use tokio::sync::watch;
use tracing::info;

pub async fn run_server(settings: ServerSettings) -> anyhow::Result<()> {
    info!(env = %settings.env, "confhub server starting");
    std::fs::create_dir_all(&settings.data_dir)?;

    let db_path = settings.data_dir.join("confhub.redb");
    let store = StateStore::open(&db_path)
        .with_context(|| format!("open state store {}", db_path.display()))?;
    info!(path = ?db_path, "state store opened");

    let ctx = ServerContext::from_settings(store, &settings);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = ctx.spawn_background(shutdown_rx.clone());

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, watch_timeout = ?settings.watch_timeout(), "config API listening");

    let registration = Arc::new(
        ServerRegistration::new(
            DiscoverClient::new(settings.discover_addr.as_str()),
            &settings.host,
            settings.port,
            settings.env,
        )
        .with_interval(settings.heartbeat_interval()),
    );
    registration
        .register()
        .await
        .with_context(|| format!("register with discover at {}", settings.discover_addr))?;
    handles.push(tokio::spawn({
        let registration = registration.clone();
        async move { registration.run_heartbeat(shutdown_rx).await }
    }));

    axum::serve(listener, server_router(ctx))
        .with_graceful_shutdown(crate::shutdown_signal(shutdown_tx))
        .await?;

    for handle in handles {
        let _ = handle.await;
    }
    info!("confhub server stopped");
    Ok(())
}
