//! Long-poll watch endpoint logic.
//!
//! A watch request either answers at once (`refresh_all` for a new,
//! returning or already signalled instance) or parks on the instance's
//! [`ChangeSignal`](crate::notify::ChangeSignal) until a release arrives
//! or the poll times out with `nothing`. No table lock is held while
//! parked.

use std::time::Duration;

use confhub_core::wire::{WatchReply, WatchRequest};
use confhub_core::{EnvType, WatchEventType, epoch_secs};
use confhub_state::{InstanceRow, Seq};
use tracing::debug;

use crate::engine::ConfigEngine;
use crate::error::{ConfigError, ConfigResult};
use crate::instances::Admission;

pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Clone)]
pub struct WatchService {
    engine: ConfigEngine,
    env: EnvType,
    timeout: Duration,
}

impl WatchService {
    pub fn new(engine: ConfigEngine, env: EnvType) -> Self {
        Self {
            engine,
            env,
            timeout: DEFAULT_WATCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(&self) -> EnvType {
        self.env
    }

    pub async fn watch(&self, req: &WatchRequest) -> ConfigResult<WatchReply> {
        for (field, value) in [("app", &req.app), ("cluster", &req.cluster), ("host", &req.host)] {
            if value.trim().is_empty() {
                return Err(ConfigError::validation(format!("{field} is required")));
            }
        }
        if req.port == 0 {
            return Err(ConfigError::validation("port is required"));
        }
        if req.env != self.env {
            return Err(ConfigError::validation(format!(
                "server env {} does not match instance env {}",
                self.env, req.env
            )));
        }

        let row = self.resolve_instance(req)?;
        let event = match self.engine.instances.admit(&row) {
            Admission::Fresh | Admission::Refresh => WatchEventType::RefreshAll,
            Admission::Wait(signal) => {
                if signal.wait(self.timeout).await {
                    WatchEventType::RefreshAll
                } else {
                    WatchEventType::Nothing
                }
            }
        };
        debug!(instance_id = row.id, ?event, "watch answered");
        Ok(WatchReply {
            event,
            instance_id: row.id,
        })
    }

    /// Best-effort offline notice from a departing client.
    pub fn exit(&self, instance_id: u64) -> bool {
        self.engine.instances.exit(instance_id)
    }

    /// The durable row of the requesting endpoint, created on first contact.
    fn resolve_instance(&self, req: &WatchRequest) -> ConfigResult<InstanceRow> {
        let (app_id, cluster_id, found) = self.engine.store.read(
            |tx| -> ConfigResult<(u64, u64, Option<InstanceRow>)> {
                let app = tx
                    .app_by_name(&req.app)?
                    .ok_or_else(|| ConfigError::not_found(format!("app {}", req.app)))?;
                let cluster = tx
                    .cluster_by_name(app.id, &req.cluster)?
                    .ok_or_else(|| ConfigError::not_found(format!("cluster {}", req.cluster)))?;
                let found = tx.instance_by_endpoint(app.id, cluster.id, &req.host, req.port)?;
                Ok((app.id, cluster.id, found))
            },
        )?;
        if let Some(row) = found {
            return Ok(row);
        }

        self.engine.store.write(|tx| -> ConfigResult<InstanceRow> {
            if let Some(row) = tx.instance_by_endpoint(app_id, cluster_id, &req.host, req.port)? {
                return Ok(row);
            }
            let now = epoch_secs();
            let row = InstanceRow {
                id: tx.next_id(Seq::Instance)?,
                app_id,
                cluster_id,
                host: req.host.clone(),
                port: req.port,
                release_history_id: None,
                created_at: now,
                updated_at: now,
            };
            tx.put_instance(&row)?;
            Ok(row)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::seeded_world;
    use confhub_core::RunStatus;
    use std::time::Instant;

    fn request(port: u16) -> WatchRequest {
        WatchRequest {
            app: "billing".to_string(),
            cluster: "default".to_string(),
            env: EnvType::Develop,
            host: "10.0.0.5".to_string(),
            port,
        }
    }

    #[tokio::test]
    async fn first_watch_always_refreshes() {
        let world = seeded_world();
        let service = WatchService::new(world.engine.clone(), EnvType::Develop);
        let started = Instant::now();
        let reply = service.watch(&request(7000)).await.unwrap();
        assert_eq!(reply.event, WatchEventType::RefreshAll);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn quiet_watch_times_out_with_nothing() {
        let world = seeded_world();
        let service = WatchService::new(world.engine.clone(), EnvType::Develop)
            .with_timeout(Duration::from_millis(40));
        let first = service.watch(&request(7000)).await.unwrap();
        let second = service.watch(&request(7000)).await.unwrap();
        assert_eq!(second.event, WatchEventType::Nothing);
        assert_eq!(second.instance_id, first.instance_id);
    }

    #[tokio::test]
    async fn release_wakes_parked_watch() {
        let world = seeded_world();
        let service = WatchService::new(world.engine.clone(), EnvType::Develop)
            .with_timeout(Duration::from_secs(10));
        service.watch(&request(7000)).await.unwrap();

        let parked = {
            let service = service.clone();
            tokio::spawn(async move { service.watch(&request(7000)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        world.engine.create_item(world.ns, "timeout", "30", "", "alice").unwrap();
        world.engine.release(world.ns, "v1", "", "alice").unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), parked)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply.event, WatchEventType::RefreshAll);
    }

    #[tokio::test]
    async fn rejects_foreign_env_and_unknown_cluster() {
        let world = seeded_world();
        let service = WatchService::new(world.engine.clone(), EnvType::Product);
        assert!(matches!(
            service.watch(&request(7000)).await,
            Err(ConfigError::Validation(_))
        ));

        let service = WatchService::new(world.engine.clone(), EnvType::Develop);
        let mut req = request(7000);
        req.cluster = "nope".to_string();
        assert!(matches!(service.watch(&req).await, Err(ConfigError::NotFound(_))));
        req.port = 0;
        assert!(matches!(service.watch(&req).await, Err(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn endpoints_map_to_stable_ids() {
        let world = seeded_world();
        let service = WatchService::new(world.engine.clone(), EnvType::Develop)
            .with_timeout(Duration::from_millis(10));
        let a = service.watch(&request(7000)).await.unwrap();
        let b = service.watch(&request(7001)).await.unwrap();
        let a_again = service.watch(&request(7000)).await.unwrap();
        assert_ne!(a.instance_id, b.instance_id);
        assert_eq!(a.instance_id, a_again.instance_id);
    }

    #[tokio::test]
    async fn exited_instance_refreshes_on_return() {
        let world = seeded_world();
        let service = WatchService::new(world.engine.clone(), EnvType::Develop)
            .with_timeout(Duration::from_millis(10));
        let reply = service.watch(&request(7000)).await.unwrap();
        assert!(service.exit(reply.instance_id));
        assert_eq!(
            world.engine.instances().status_of(reply.instance_id),
            Some(RunStatus::Offline)
        );

        let back = service.watch(&request(7000)).await.unwrap();
        assert_eq!(back.event, WatchEventType::RefreshAll);
    }
}
