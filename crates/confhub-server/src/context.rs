//! The config server: engine, watch service and connected-instance table.

use std::sync::Arc;
use std::time::Duration;

use confhub_core::EnvType;
use confhub_core::config::ServerSettings;
use confhub_state::StateStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::ConfigEngine;
use crate::instances::{InstanceTable, run_instance_sweep};
use crate::longpoll::WatchService;

#[derive(Clone)]
pub struct ServerContext {
    pub engine: ConfigEngine,
    pub watch: WatchService,
    sweep_interval: Duration,
}

impl ServerContext {
    pub fn new(store: StateStore, env: EnvType) -> Self {
        let engine = ConfigEngine::new(store, Arc::new(InstanceTable::new()));
        Self {
            watch: WatchService::new(engine.clone(), env),
            engine,
            sweep_interval: Duration::from_secs(1),
        }
    }

    pub fn from_settings(store: StateStore, settings: &ServerSettings) -> Self {
        Self::new(store, settings.env)
            .with_watch_timeout(settings.watch_timeout())
            .with_sweep_interval(settings.sweep_interval())
    }

    pub fn with_watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch = self.watch.with_timeout(timeout);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn env(&self) -> EnvType {
        self.watch.env()
    }

    pub fn instances(&self) -> &Arc<InstanceTable> {
        self.engine.instances()
    }

    /// Start the connected-instance liveness sweep.
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![tokio::spawn(run_instance_sweep(
            self.instances().clone(),
            self.sweep_interval,
            shutdown,
        ))]
    }
}
