//! Registry table: in-memory view of registered instances.
//!
//! Each instance is stored in the coordination store as one key per
//! attribute under `{instance_prefix}{id}/{attr}`. The table mirrors those
//! keys into a concurrent map and adds a liveness counter that only
//! exists in memory.
//!
//! ```text
//!   register ──put_many──▶ coordination store ──watch──▶ RegistryWatcher ──refresh(id)──┐
//!   heartbeat ─┐                                                                       ▼
//!              └──update_status──▶ store first, then ──────────────────────────▶ RegistryTable
//!   sweep (every tick): life > 0 → life - 1;  life == 0 && online → break
//! ```

use std::collections::BTreeMap;

use confhub_coord::{Coordinator, split_key};
use confhub_core::{EnvType, INSTANCE_MAX_LIFE, InstanceRecord, RunStatus};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::error::{DiscoverError, DiscoverResult};

/// Key layout and completeness rule of one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryKind {
    pub name: &'static str,
    pub instance_prefix: &'static str,
    /// Optional index key `{id_prefix}{id}` written on registration.
    pub id_prefix: Option<&'static str>,
    /// Attributes that must all exist before a new instance is loaded.
    pub required: &'static [&'static str],
}

pub const SERVERS: RegistryKind = RegistryKind {
    name: "server",
    instance_prefix: "/confhub-server/instance/",
    id_prefix: Some("/confhub-server/id/"),
    required: &["host", "port", "env", "status"],
};

pub const CLIENTS: RegistryKind = RegistryKind {
    name: "client",
    instance_prefix: "/confhub-client/instance/",
    id_prefix: None,
    required: &["host", "port", "cluster", "env", "status"],
};

impl RegistryKind {
    pub fn attr_key(&self, id: &str, attr: &str) -> String {
        format!("{}{id}/{attr}", self.instance_prefix)
    }

    pub fn instance_keys(&self, id: &str) -> String {
        format!("{}{id}/", self.instance_prefix)
    }
}

/// Apply one stored attribute to a record.
fn apply_attr(record: &mut InstanceRecord, attr: &str, value: &str) -> Result<(), String> {
    match attr {
        "host" => record.host = value.to_string(),
        "port" => {
            record.port = value
                .parse()
                .map_err(|_| format!("invalid port {value:?}"))?;
        }
        "cluster" => record.cluster = value.to_string(),
        "env" => record.env = value.parse().map_err(|e| format!("{e}"))?,
        "status" => record.status = value.parse().map_err(|e| format!("{e}"))?,
        other => return Err(format!("unknown attribute {other:?}")),
    }
    Ok(())
}

fn record_attrs(record: &InstanceRecord) -> Vec<(&'static str, String)> {
    let mut attrs = vec![
        ("host", record.host.clone()),
        ("port", record.port.to_string()),
        ("env", record.env.as_str().to_string()),
        ("status", record.status.as_str().to_string()),
    ];
    if !record.cluster.is_empty() {
        attrs.insert(2, ("cluster", record.cluster.clone()));
    }
    attrs
}

pub struct RegistryTable {
    kind: RegistryKind,
    coord: Coordinator,
    records: DashMap<String, InstanceRecord>,
    max_life: u32,
}

impl RegistryTable {
    pub fn new(kind: RegistryKind, coord: Coordinator) -> Self {
        Self {
            kind,
            coord,
            records: DashMap::new(),
            max_life: INSTANCE_MAX_LIFE,
        }
    }

    pub fn with_max_life(mut self, max_life: u32) -> Self {
        self.max_life = max_life;
        self
    }

    pub fn kind(&self) -> &RegistryKind {
        &self.kind
    }

    pub fn max_life(&self) -> u32 {
        self.max_life
    }

    // ── Map access ─────────────────────────────────────────────────

    pub fn load(&self, id: &str) -> Option<InstanceRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn store(&self, id: &str, record: InstanceRecord) {
        self.records.insert(id.to_string(), record);
    }

    pub fn delete(&self, id: &str) -> Option<InstanceRecord> {
        self.records.remove(id).map(|(_, r)| r)
    }

    /// Visit every record until `visit` returns false.
    ///
    /// Runs under the map's shard locks; the visitor must not call back
    /// into this table.
    pub fn range(&self, mut visit: impl FnMut(&InstanceRecord) -> bool) {
        for entry in self.records.iter() {
            if !visit(entry.value()) {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Online records, optionally restricted to one environment, by id.
    pub fn online(&self, env: Option<EnvType>) -> Vec<InstanceRecord> {
        let mut list = Vec::new();
        self.range(|r| {
            if r.is_online() && env.is_none_or(|e| e == r.env) {
                list.push(r.clone());
            }
            true
        });
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    // ── Status transitions ─────────────────────────────────────────

    /// Move `id` to `status`, persisting the attribute before the cache.
    pub async fn update_status(&self, id: &str, status: RunStatus) -> DiscoverResult<()> {
        let current = self
            .load(id)
            .ok_or_else(|| DiscoverError::NotFound {
                kind: self.kind.name,
                id: id.to_string(),
            })?;
        if current.status == status {
            return Ok(());
        }

        self.coord
            .put(&self.kind.attr_key(id, "status"), status.as_str())
            .await?;

        if let Some(mut record) = self.records.get_mut(id) {
            record.status = status;
            record.life = if status == RunStatus::Online {
                self.max_life
            } else {
                0
            };
        }
        info!(
            registry = self.kind.name,
            %id,
            from = %current.status,
            to = %status,
            "instance status changed"
        );
        Ok(())
    }

    /// String form of [`update_status`](Self::update_status) for wire input.
    pub async fn update_status_str(&self, id: &str, status: &str) -> DiscoverResult<()> {
        let status: RunStatus = status.parse()?;
        self.update_status(id, status).await
    }

    /// Record a heartbeat. Online heartbeats restore full life.
    pub async fn heartbeat(&self, id: &str, status: Option<RunStatus>) -> DiscoverResult<()> {
        let status = status.unwrap_or(RunStatus::Online);
        self.update_status(id, status).await?;
        if status == RunStatus::Online {
            if let Some(mut record) = self.records.get_mut(id) {
                record.life = self.max_life;
            }
        }
        debug!(registry = self.kind.name, %id, %status, "heartbeat received");
        Ok(())
    }

    /// One liveness tick. Returns the ids demoted to `break`.
    pub async fn sweep(&self) -> Vec<String> {
        let mut expired = Vec::new();
        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            if record.life > 0 {
                record.life -= 1;
            } else if record.status == RunStatus::Online {
                expired.push(record.id.clone());
            }
        }

        for id in &expired {
            if let Err(e) = self.update_status(id, RunStatus::Break).await {
                error!(registry = self.kind.name, %id, error = %e, "failed to mark instance break");
            }
        }
        expired
    }

    // ── Coordination store sync ────────────────────────────────────

    /// Write every attribute of a new or returning instance.
    pub async fn register(&self, mut record: InstanceRecord) -> DiscoverResult<InstanceRecord> {
        if record.id.trim().is_empty() {
            return Err(DiscoverError::Validation(format!("{} id is required", self.kind.name)));
        }
        if record.host.trim().is_empty() {
            return Err(DiscoverError::Validation(format!("{} host is required", self.kind.name)));
        }

        let mut kvs: Vec<(String, String)> = Vec::new();
        if let Some(id_prefix) = self.kind.id_prefix {
            kvs.push((format!("{id_prefix}{}", record.id), record.id.clone()));
        }
        for (attr, value) in record_attrs(&record) {
            kvs.push((self.kind.attr_key(&record.id, attr), value));
        }
        self.coord.put_many(&kvs).await?;

        record.life = if record.is_online() { self.max_life } else { 0 };
        self.records.insert(record.id.clone(), record.clone());
        info!(
            registry = self.kind.name,
            id = %record.id,
            address = %record.address(),
            env = %record.env,
            "instance registered"
        );
        Ok(record)
    }

    /// Rebuild the whole table from the coordination store.
    ///
    /// Malformed keys and unknown attributes are skipped.
    pub async fn init_from_store(&self) -> DiscoverResult<usize> {
        let kvs = self.coord.get_with_prefix(self.kind.instance_prefix).await?;

        let mut grouped: BTreeMap<String, InstanceRecord> = BTreeMap::new();
        for kv in kvs {
            let (id, attr) = match split_key(self.kind.instance_prefix, &kv.key) {
                Ok(parts) => parts,
                Err(e) => {
                    warn!(registry = self.kind.name, key = %kv.key, error = %e, "skipping malformed key");
                    continue;
                }
            };
            let record = grouped
                .entry(id.clone())
                .or_insert_with(|| InstanceRecord::empty(&id));
            if let Err(reason) = apply_attr(record, &attr, &kv.value) {
                warn!(registry = self.kind.name, key = %kv.key, %reason, "skipping attribute");
            }
        }

        let count = grouped.len();
        for (id, mut record) in grouped {
            record.life = if record.is_online() { self.max_life } else { 0 };
            self.records.insert(id, record);
        }
        info!(registry = self.kind.name, count, "registry loaded");
        Ok(count)
    }

    /// Re-read one instance. Returns false if it no longer exists.
    pub async fn refresh(&self, id: &str) -> DiscoverResult<bool> {
        let kvs = self.coord.get_with_prefix(&self.kind.instance_keys(id)).await?;
        if kvs.is_empty() {
            self.records.remove(id);
            debug!(registry = self.kind.name, %id, "instance gone from store");
            return Ok(false);
        }

        let mut record = InstanceRecord::empty(id);
        for kv in &kvs {
            let applied = split_key(self.kind.instance_prefix, &kv.key)
                .map_err(|e| e.to_string())
                .and_then(|(_, attr)| apply_attr(&mut record, &attr, &kv.value));
            if let Err(reason) = applied {
                warn!(registry = self.kind.name, key = %kv.key, %reason, "skipping attribute");
            }
        }

        let existing = self.records.get(id).map(|r| (r.status, r.life));
        record.life = match existing {
            Some((RunStatus::Online, life)) if record.is_online() => life,
            _ if record.is_online() => self.max_life,
            _ => 0,
        };
        self.records.insert(id.to_string(), record);
        debug!(registry = self.kind.name, %id, "instance refreshed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confhub_coord::EmbeddedCoordStore;
    use std::sync::Arc;

    fn test_coord() -> Coordinator {
        Coordinator::new(Arc::new(EmbeddedCoordStore::open_in_memory().unwrap()))
    }

    fn test_record(id: &str) -> InstanceRecord {
        InstanceRecord {
            id: id.to_string(),
            host: "10.0.0.1".to_string(),
            port: 8600,
            cluster: String::new(),
            env: EnvType::Develop,
            status: RunStatus::Online,
            life: 0,
        }
    }

    #[tokio::test]
    async fn register_writes_every_attribute() {
        let coord = test_coord();
        let table = RegistryTable::new(SERVERS, coord.clone());
        let record = table.register(test_record("s1")).await.unwrap();
        assert_eq!(record.life, INSTANCE_MAX_LIFE);

        assert_eq!(
            coord.get("/confhub-server/instance/s1/status").await.unwrap().as_deref(),
            Some("online")
        );
        assert_eq!(
            coord.get("/confhub-server/id/s1").await.unwrap().as_deref(),
            Some("s1")
        );
        assert!(table.load("s1").is_some());
    }

    #[tokio::test]
    async fn register_requires_id() {
        let table = RegistryTable::new(SERVERS, test_coord());
        let err = table.register(test_record("  ")).await.unwrap_err();
        assert!(matches!(err, DiscoverError::Validation(_)));
    }

    #[tokio::test]
    async fn update_status_persists_before_cache() {
        let coord = test_coord();
        let table = RegistryTable::new(SERVERS, coord.clone());
        table.register(test_record("s1")).await.unwrap();

        table.update_status("s1", RunStatus::Offline).await.unwrap();
        let record = table.load("s1").unwrap();
        assert_eq!(record.status, RunStatus::Offline);
        assert_eq!(record.life, 0);
        assert_eq!(
            coord.get("/confhub-server/instance/s1/status").await.unwrap().as_deref(),
            Some("offline")
        );
    }

    #[tokio::test]
    async fn update_status_rejects_unknown_values_and_ids() {
        let table = RegistryTable::new(SERVERS, test_coord());
        table.register(test_record("s1")).await.unwrap();

        let err = table.update_status_str("s1", "sleeping").await.unwrap_err();
        assert!(matches!(err, DiscoverError::UnknownStatus(_)));

        let err = table.update_status("nope", RunStatus::Online).await.unwrap_err();
        assert!(matches!(err, DiscoverError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unchanged_status_is_a_no_op() {
        let table = RegistryTable::new(SERVERS, test_coord()).with_max_life(5);
        table.register(test_record("s1")).await.unwrap();
        table.sweep().await;
        assert_eq!(table.load("s1").unwrap().life, 4);

        table.update_status("s1", RunStatus::Online).await.unwrap();
        assert_eq!(table.load("s1").unwrap().life, 4);
    }

    #[tokio::test]
    async fn liveness_demotes_exactly_once() {
        let table = RegistryTable::new(SERVERS, test_coord()).with_max_life(2);
        table.register(test_record("s1")).await.unwrap();

        assert!(table.sweep().await.is_empty());
        assert_eq!(table.load("s1").unwrap().life, 1);
        assert!(table.sweep().await.is_empty());
        assert_eq!(table.load("s1").unwrap().life, 0);

        assert_eq!(table.sweep().await, vec!["s1".to_string()]);
        assert_eq!(table.load("s1").unwrap().status, RunStatus::Break);

        assert!(table.sweep().await.is_empty());
        assert_eq!(table.load("s1").unwrap().status, RunStatus::Break);
    }

    #[tokio::test]
    async fn life_never_grows_without_heartbeat() {
        let table = RegistryTable::new(SERVERS, test_coord()).with_max_life(3);
        table.register(test_record("s1")).await.unwrap();

        let mut previous = table.load("s1").unwrap().life;
        for _ in 0..6 {
            table.sweep().await;
            let life = table.load("s1").unwrap().life;
            assert!(life <= previous);
            previous = life;
        }

        table.heartbeat("s1", None).await.unwrap();
        let record = table.load("s1").unwrap();
        assert_eq!(record.status, RunStatus::Online);
        assert_eq!(record.life, 3);
    }

    #[tokio::test]
    async fn offline_heartbeat_takes_instance_down() {
        let table = RegistryTable::new(SERVERS, test_coord());
        table.register(test_record("s1")).await.unwrap();
        table.heartbeat("s1", Some(RunStatus::Offline)).await.unwrap();
        assert_eq!(table.load("s1").unwrap().status, RunStatus::Offline);
        assert!(table.online(None).is_empty());
    }

    #[tokio::test]
    async fn init_from_store_skips_garbage() {
        let coord = test_coord();
        for (key, value) in [
            ("/confhub-server/instance/s1/host", "10.0.0.1"),
            ("/confhub-server/instance/s1/port", "8600"),
            ("/confhub-server/instance/s1/env", "product"),
            ("/confhub-server/instance/s1/status", "online"),
            ("/confhub-server/instance/s1/colour", "blue"),
            ("/confhub-server/instance/s2/host", "10.0.0.2"),
            ("/confhub-server/instance/s2/status", "break"),
            ("/confhub-server/instance/s3", "no-attr"),
            ("/confhub-server/instance/s4/a/b", "too-deep"),
        ] {
            coord.put(key, value).await.unwrap();
        }

        let table = RegistryTable::new(SERVERS, coord);
        assert_eq!(table.init_from_store().await.unwrap(), 2);

        let s1 = table.load("s1").unwrap();
        assert_eq!(s1.env, EnvType::Product);
        assert_eq!(s1.life, INSTANCE_MAX_LIFE);
        let s2 = table.load("s2").unwrap();
        assert_eq!(s2.status, RunStatus::Break);
        assert_eq!(s2.life, 0);
    }

    #[tokio::test]
    async fn refresh_keeps_life_and_drops_vanished() {
        let coord = test_coord();
        let table = RegistryTable::new(SERVERS, coord.clone()).with_max_life(10);
        table.register(test_record("s1")).await.unwrap();
        table.sweep().await;

        coord
            .put("/confhub-server/instance/s1/host", "10.9.9.9")
            .await
            .unwrap();
        assert!(table.refresh("s1").await.unwrap());
        let record = table.load("s1").unwrap();
        assert_eq!(record.host, "10.9.9.9");
        assert_eq!(record.life, 9);

        coord
            .delete_with_prefix("/confhub-server/instance/s1/")
            .await
            .unwrap();
        assert!(!table.refresh("s1").await.unwrap());
        assert!(table.load("s1").is_none());
    }

    #[tokio::test]
    async fn online_filters_by_env() {
        let table = RegistryTable::new(SERVERS, test_coord());
        table.register(test_record("a")).await.unwrap();
        let mut prod = test_record("b");
        prod.env = EnvType::Product;
        table.register(prod).await.unwrap();

        assert_eq!(table.online(None).len(), 2);
        let prod_only = table.online(Some(EnvType::Product));
        assert_eq!(prod_only.len(), 1);
        assert_eq!(prod_only[0].id, "b");
    }
}
