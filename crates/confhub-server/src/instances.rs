//! In-memory table of client instances connected to this server.
//!
//! ```text
//!   watch ──admit──▶ vacant?                 ──▶ Fresh   (insert online, refresh_all)
//!                    not online or pending?  ──▶ Refresh (drain, refresh_all)
//!                    otherwise               ──▶ Wait    (caller awaits the signal)
//!   release ──broadcast──▶ signal every instance
//!   sweep (1s): life > 0 → life - 1;  life == 0 && online → break
//! ```
//!
//! Entries are never persisted; the durable identity of an instance lives
//! in the state store's instance rows.

use std::sync::Arc;
use std::time::Duration;

use confhub_core::{INSTANCE_MAX_LIFE, RunStatus};
use confhub_state::InstanceRow;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::notify::ChangeSignal;

#[derive(Debug, Clone)]
pub struct ConnectedInstance {
    pub id: u64,
    pub app_id: u64,
    pub cluster_id: u64,
    pub host: String,
    pub port: u16,
    pub status: RunStatus,
    pub life: u32,
    pub signal: Arc<ChangeSignal>,
}

/// Outcome of a watch request reaching the table.
#[derive(Debug)]
pub enum Admission {
    /// First contact; the instance must pull everything.
    Fresh,
    /// Known instance that came back or has changes waiting.
    Refresh,
    /// Nothing pending; wait on this signal.
    Wait(Arc<ChangeSignal>),
}

#[derive(Debug)]
pub struct InstanceTable {
    instances: DashMap<u64, ConnectedInstance>,
    max_life: u32,
}

impl Default for InstanceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceTable {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            max_life: INSTANCE_MAX_LIFE,
        }
    }

    pub fn with_max_life(mut self, max_life: u32) -> Self {
        self.max_life = max_life;
        self
    }

    /// Record a watch request from `row` and decide how to answer it.
    pub fn admit(&self, row: &InstanceRow) -> Admission {
        match self.instances.entry(row.id) {
            Entry::Vacant(slot) => {
                slot.insert(ConnectedInstance {
                    id: row.id,
                    app_id: row.app_id,
                    cluster_id: row.cluster_id,
                    host: row.host.clone(),
                    port: row.port,
                    status: RunStatus::Online,
                    life: self.max_life,
                    signal: Arc::new(ChangeSignal::new()),
                });
                info!(instance_id = row.id, host = %row.host, port = row.port, "instance connected");
                Admission::Fresh
            }
            Entry::Occupied(mut slot) => {
                let instance = slot.get_mut();
                let pending = instance.signal.take();
                let was_online = instance.status == RunStatus::Online;
                instance.status = RunStatus::Online;
                instance.life = self.max_life;
                if !was_online || pending {
                    Admission::Refresh
                } else {
                    Admission::Wait(instance.signal.clone())
                }
            }
        }
    }

    /// Signal every instance. Returns how many had nothing pending.
    pub fn broadcast(&self) -> usize {
        self.instances
            .iter()
            .filter(|entry| entry.value().signal.signal())
            .count()
    }

    /// Take an instance offline at its own request.
    pub fn exit(&self, id: u64) -> bool {
        match self.instances.get_mut(&id) {
            Some(mut instance) => {
                instance.life = 0;
                instance.status = RunStatus::Offline;
                info!(instance_id = id, "instance exited");
                true
            }
            None => false,
        }
    }

    /// One liveness tick. Returns the ids demoted to `break`.
    pub fn sweep(&self) -> Vec<u64> {
        let mut expired = Vec::new();
        for mut entry in self.instances.iter_mut() {
            let instance = entry.value_mut();
            if instance.life > 0 {
                instance.life -= 1;
            } else if instance.status == RunStatus::Online {
                instance.status = RunStatus::Break;
                expired.push(instance.id);
            }
        }
        expired
    }

    pub fn get(&self, id: u64) -> Option<ConnectedInstance> {
        self.instances.get(&id).map(|entry| entry.value().clone())
    }

    pub fn status_of(&self, id: u64) -> Option<RunStatus> {
        self.instances.get(&id).map(|entry| entry.status)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Sweep `table` every `interval` until `shutdown` flips to true.
pub async fn run_instance_sweep(
    table: Arc<InstanceTable>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = table.sweep();
                if !expired.is_empty() {
                    info!(count = expired.len(), ids = ?expired, "instances stopped polling");
                }
            }
            _ = shutdown.changed() => {
                debug!("instance sweep stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: u64) -> InstanceRow {
        InstanceRow {
            id,
            app_id: 1,
            cluster_id: 1,
            host: "10.1.1.1".to_string(),
            port: 9000 + id as u16,
            release_history_id: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn first_contact_is_fresh_then_waits() {
        let table = InstanceTable::new();
        assert!(matches!(table.admit(&row(1)), Admission::Fresh));
        assert!(matches!(table.admit(&row(1)), Admission::Wait(_)));
    }

    #[test]
    fn pending_signal_forces_refresh_once() {
        let table = InstanceTable::new();
        table.admit(&row(1));
        table.broadcast();
        table.broadcast();
        table.broadcast();

        assert!(matches!(table.admit(&row(1)), Admission::Refresh));
        assert!(matches!(table.admit(&row(1)), Admission::Wait(_)));
    }

    #[test]
    fn returning_instance_refreshes() {
        let table = InstanceTable::new().with_max_life(1);
        table.admit(&row(1));
        table.sweep();
        assert_eq!(table.sweep(), vec![1]);
        assert_eq!(table.status_of(1), Some(RunStatus::Break));

        assert!(matches!(table.admit(&row(1)), Admission::Refresh));
        let instance = table.get(1).unwrap();
        assert_eq!(instance.status, RunStatus::Online);
        assert_eq!(instance.life, 1);
    }

    #[test]
    fn exit_takes_instance_offline() {
        let table = InstanceTable::new();
        table.admit(&row(4));
        assert!(table.exit(4));
        assert!(!table.exit(5));
        assert_eq!(table.status_of(4), Some(RunStatus::Offline));
        // Offline instances are not demoted again.
        assert!(table.sweep().is_empty());
    }

    #[test]
    fn broadcast_counts_newly_dirty_instances() {
        let table = InstanceTable::new();
        table.admit(&row(1));
        table.admit(&row(2));
        assert_eq!(table.broadcast(), 2);
        assert_eq!(table.broadcast(), 0);
    }
}
