//! The discover service: both registries plus their background tasks.

use std::sync::Arc;
use std::time::Duration;

use confhub_coord::Coordinator;
use confhub_core::wire::RegisterRequest;
use confhub_core::{EnvType, InstanceRecord, Role, RunStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::DiscoverResult;
use crate::liveness::run_liveness;
use crate::registry::{CLIENTS, RegistryTable, SERVERS};
use crate::watcher::{RegistryWatcher, run_watch};

/// Delay between watch subscription attempts.
const WATCH_RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct DiscoverContext {
    pub servers: Arc<RegistryTable>,
    pub clients: Arc<RegistryTable>,
    coord: Coordinator,
}

impl DiscoverContext {
    pub fn new(coord: Coordinator) -> Self {
        Self {
            servers: Arc::new(RegistryTable::new(SERVERS, coord.clone())),
            clients: Arc::new(RegistryTable::new(CLIENTS, coord.clone())),
            coord,
        }
    }

    pub fn table(&self, role: Role) -> &Arc<RegistryTable> {
        match role {
            Role::Server => &self.servers,
            Role::Client => &self.clients,
        }
    }

    /// Load both registries from the coordination store.
    pub async fn bootstrap(&self) -> DiscoverResult<()> {
        let servers = self.servers.init_from_store().await?;
        let clients = self.clients.init_from_store().await?;
        info!(servers, clients, "discover registries bootstrapped");
        Ok(())
    }

    /// Start the store watchers and liveness sweeps for both registries.
    pub fn spawn_background(
        &self,
        sweep_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for table in [self.servers.clone(), self.clients.clone()] {
            let watcher = Arc::new(RegistryWatcher::new(table.clone(), self.coord.clone()));
            let rx = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_watch(watcher, WATCH_RESTART_DELAY, rx).await;
            }));
            handles.push(tokio::spawn(run_liveness(
                table,
                sweep_interval,
                shutdown.clone(),
            )));
        }
        handles
    }

    pub async fn register(&self, role: Role, req: RegisterRequest) -> DiscoverResult<InstanceRecord> {
        let record = InstanceRecord {
            id: req.id,
            host: req.host,
            port: req.port,
            cluster: req.cluster,
            env: req.env,
            status: RunStatus::Online,
            life: 0,
        };
        self.table(role).register(record).await
    }

    pub async fn heartbeat(
        &self,
        role: Role,
        id: &str,
        status: Option<RunStatus>,
    ) -> DiscoverResult<()> {
        self.table(role).heartbeat(id, status).await
    }

    pub fn fetch(&self, role: Role, env: Option<EnvType>) -> Vec<InstanceRecord> {
        self.table(role).online(env)
    }
}
