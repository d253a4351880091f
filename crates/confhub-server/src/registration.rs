//! Self-registration of a config server with the discover service.
//!
//! The server registers once at startup (failure is fatal to the
//! caller), then heartbeats on a fixed interval. On shutdown it reports
//! itself offline so clients stop picking it before the liveness sweep
//! would notice.

use std::time::Duration;

use confhub_core::wire::RegisterRequest;
use confhub_core::{DiscoverClient, EnvType, HttpError, Role, RunStatus, endpoint_id};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct ServerRegistration {
    client: DiscoverClient,
    request: RegisterRequest,
    interval: Duration,
}

impl ServerRegistration {
    pub fn new(client: DiscoverClient, host: &str, port: u16, env: EnvType) -> Self {
        let id = endpoint_id("server", &[host, &port.to_string(), env.as_str()]);
        Self {
            client,
            request: RegisterRequest {
                id,
                host: host.to_string(),
                port,
                cluster: String::new(),
                env,
            },
            interval: Duration::from_secs(10),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn id(&self) -> &str {
        &self.request.id
    }

    pub async fn register(&self) -> Result<(), HttpError> {
        self.client.register(Role::Server, &self.request).await?;
        info!(
            server_id = %self.request.id,
            discover = %self.client.address(),
            env = %self.request.env,
            "registered with discover"
        );
        Ok(())
    }

    /// Heartbeat until `shutdown` flips, then report offline.
    pub async fn run_heartbeat(&self, mut shutdown: watch::Receiver<bool>) {
        let id = self.request.id.as_str();
        info!(server_id = %id, interval = ?self.interval, "heartbeat loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.client.heartbeat(Role::Server, id, None).await {
                        Ok(_) => debug!(server_id = %id, "heartbeat sent"),
                        Err(e) => warn!(server_id = %id, error = %e, "heartbeat failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!(server_id = %id, "heartbeat loop shutting down");
                    break;
                }
            }
        }

        if let Err(e) = self
            .client
            .heartbeat(Role::Server, id, Some(RunStatus::Offline))
            .await
        {
            warn!(server_id = %id, error = %e, "offline notice failed");
        }
    }
}
