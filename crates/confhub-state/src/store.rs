//! StateStore: redb-backed persistence for the config center.
//!
//! All access goes through a unit of work: [`StateStore::read`] hands a
//! closure a read snapshot, [`StateStore::write`] hands it a write
//! transaction that commits when the closure returns `Ok` and aborts on
//! `Err`. redb admits one writer at a time, so everything inside one
//! `write` call is serialized against every other write.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for def in [
            APPS,
            CLUSTERS,
            NAMESPACES,
            ITEMS,
            RELEASES,
            RELEASE_HISTORY,
            COMMITS,
            RECORDS,
            INSTANCES,
        ] {
            txn.open_table(def).map_err(map_err!(Table))?;
        }
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` against a consistent read snapshot.
    pub fn read<T, E>(&self, f: impl FnOnce(&ReadTx) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StateError>,
    {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        f(&ReadTx { txn })
    }

    /// Run `f` in a write transaction; commit on `Ok`, abort on `Err`.
    pub fn write<T, E>(&self, f: impl FnOnce(&WriteTx) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StateError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let tx = WriteTx { txn };
        match f(&tx) {
            Ok(value) => {
                tx.txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = tx.txn.abort() {
                    warn!(error = %abort, "state transaction abort failed");
                }
                Err(e)
            }
        }
    }
}

/// Read-only view of the store.
pub struct ReadTx {
    txn: redb::ReadTransaction,
}

/// Read-write view of the store; reads observe this transaction's writes.
pub struct WriteTx {
    txn: redb::WriteTransaction,
}

fn decode_one<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    name: &'static str,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => serde_json::from_slice(guard.value())
            .map(Some)
            .map_err(|e| StateError::Decode {
                table: name,
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn decode_scan<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    name: &'static str,
    prefix: &str,
) -> StateResult<Vec<T>> {
    let mut rows = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(prefix) {
            continue;
        }
        let row = serde_json::from_slice(value.value()).map_err(|e| StateError::Decode {
            table: name,
            key: key.value().to_string(),
            reason: e.to_string(),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Typed lookups shared by both transaction kinds.
macro_rules! read_methods {
    ($tx:ty) => {
        impl $tx {
            fn one<T: DeserializeOwned>(
                &self,
                def: RowTable,
                name: &'static str,
                key: &str,
            ) -> StateResult<Option<T>> {
                let table = self.txn.open_table(def).map_err(map_err!(Table))?;
                decode_one(&table, name, key)
            }

            fn scan<T: DeserializeOwned>(
                &self,
                def: RowTable,
                name: &'static str,
                prefix: &str,
            ) -> StateResult<Vec<T>> {
                let table = self.txn.open_table(def).map_err(map_err!(Table))?;
                decode_scan(&table, name, prefix)
            }

            /// Current store revision (0 before the first item write).
            pub fn revision(&self) -> StateResult<u64> {
                let table = self.txn.open_table(META).map_err(map_err!(Table))?;
                let value = table
                    .get(REVISION_KEY)
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value())
                    .unwrap_or(0);
                Ok(value)
            }

            // ── Topology ───────────────────────────────────────────

            pub fn app(&self, id: u64) -> StateResult<Option<App>> {
                self.one(APPS, "apps", &id_key(id))
            }

            pub fn apps(&self) -> StateResult<Vec<App>> {
                self.scan(APPS, "apps", "")
            }

            pub fn app_by_name(&self, name: &str) -> StateResult<Option<App>> {
                Ok(self.apps()?.into_iter().find(|a| a.name == name))
            }

            pub fn cluster(&self, id: u64) -> StateResult<Option<Cluster>> {
                self.one(CLUSTERS, "clusters", &id_key(id))
            }

            pub fn clusters_for_app(&self, app_id: u64) -> StateResult<Vec<Cluster>> {
                let all: Vec<Cluster> = self.scan(CLUSTERS, "clusters", "")?;
                Ok(all.into_iter().filter(|c| c.app_id == app_id).collect())
            }

            pub fn cluster_by_name(&self, app_id: u64, name: &str) -> StateResult<Option<Cluster>> {
                Ok(self
                    .clusters_for_app(app_id)?
                    .into_iter()
                    .find(|c| c.name == name))
            }

            pub fn namespace(&self, id: u64) -> StateResult<Option<Namespace>> {
                self.one(NAMESPACES, "namespaces", &id_key(id))
            }

            pub fn namespaces_for_app(&self, app_id: u64) -> StateResult<Vec<Namespace>> {
                let all: Vec<Namespace> = self.scan(NAMESPACES, "namespaces", "")?;
                Ok(all.into_iter().filter(|n| n.app_id == app_id).collect())
            }

            pub fn namespace_by_name(
                &self,
                app_id: u64,
                cluster_id: u64,
                name: &str,
            ) -> StateResult<Option<Namespace>> {
                Ok(self
                    .namespaces_for_app(app_id)?
                    .into_iter()
                    .find(|n| n.cluster_id == cluster_id && n.name == name))
            }

            // ── Items ──────────────────────────────────────────────

            /// Every item of a namespace, soft-deleted ones included, by id.
            pub fn items(&self, namespace_id: u64) -> StateResult<Vec<ConfigItem>> {
                self.scan(ITEMS, "items", &scope_prefix(namespace_id))
            }

            pub fn item_by_key(&self, namespace_id: u64, key: &str) -> StateResult<Option<ConfigItem>> {
                Ok(self.items(namespace_id)?.into_iter().find(|i| i.key == key))
            }

            pub fn item_by_id(&self, id: u64) -> StateResult<Option<ConfigItem>> {
                let all: Vec<ConfigItem> = self.scan(ITEMS, "items", "")?;
                Ok(all.into_iter().find(|i| i.id == id))
            }

            // ── Releases ───────────────────────────────────────────

            pub fn release(&self, id: u64) -> StateResult<Option<Release>> {
                self.one(RELEASES, "releases", &id_key(id))
            }

            /// Release history of a namespace, oldest first.
            pub fn release_history(&self, namespace_id: u64) -> StateResult<Vec<ReleaseHistory>> {
                self.scan(RELEASE_HISTORY, "release_history", &scope_prefix(namespace_id))
            }

            pub fn latest_history(&self, namespace_id: u64) -> StateResult<Option<ReleaseHistory>> {
                Ok(self.release_history(namespace_id)?.pop())
            }

            pub fn latest_normal_history(
                &self,
                namespace_id: u64,
            ) -> StateResult<Option<ReleaseHistory>> {
                Ok(self
                    .release_history(namespace_id)?
                    .into_iter()
                    .rev()
                    .find(|h| h.op_type == ReleaseOpType::Normal))
            }

            /// The normal entry that published `release_id`.
            pub fn normal_history_for_release(
                &self,
                namespace_id: u64,
                release_id: u64,
            ) -> StateResult<Option<ReleaseHistory>> {
                Ok(self
                    .release_history(namespace_id)?
                    .into_iter()
                    .find(|h| h.op_type == ReleaseOpType::Normal && h.release_id == release_id))
            }

            /// The latest normal history entry of a namespace and its release.
            pub fn effective_release(
                &self,
                namespace_id: u64,
            ) -> StateResult<Option<(ReleaseHistory, Release)>> {
                let Some(entry) = self.latest_normal_history(namespace_id)? else {
                    return Ok(None);
                };
                match self.release(entry.release_id)? {
                    Some(release) => Ok(Some((entry, release))),
                    None => Err(StateError::Read(format!(
                        "release {} referenced by history {} is missing",
                        entry.release_id, entry.id
                    ))),
                }
            }

            // ── Audit trail ────────────────────────────────────────

            /// Commits of a namespace, oldest first.
            pub fn commits(&self, namespace_id: u64) -> StateResult<Vec<Commit>> {
                self.scan(COMMITS, "commits", &scope_prefix(namespace_id))
            }

            pub fn records(&self) -> StateResult<Vec<AuditRecord>> {
                self.scan(RECORDS, "records", "")
            }

            // ── Client instances ───────────────────────────────────

            pub fn instance(&self, id: u64) -> StateResult<Option<InstanceRow>> {
                self.one(INSTANCES, "instances", &id_key(id))
            }

            pub fn instances(&self) -> StateResult<Vec<InstanceRow>> {
                self.scan(INSTANCES, "instances", "")
            }

            pub fn instance_by_endpoint(
                &self,
                app_id: u64,
                cluster_id: u64,
                host: &str,
                port: u16,
            ) -> StateResult<Option<InstanceRow>> {
                Ok(self.instances()?.into_iter().find(|i| {
                    i.app_id == app_id && i.cluster_id == cluster_id && i.host == host && i.port == port
                }))
            }
        }
    };
}

read_methods!(ReadTx);
read_methods!(WriteTx);

impl WriteTx {
    fn put<T: Serialize>(
        &self,
        def: RowTable,
        name: &'static str,
        key: &str,
        row: &T,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(row).map_err(|e| StateError::Encode {
            table: name,
            reason: e.to_string(),
        })?;
        let mut table = self.txn.open_table(def).map_err(map_err!(Table))?;
        table
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    fn bump(&self, key: &str) -> StateResult<u64> {
        let mut table = self.txn.open_table(META).map_err(map_err!(Table))?;
        let next = table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0)
            + 1;
        table.insert(key, next).map_err(map_err!(Write))?;
        Ok(next)
    }

    /// Allocate the next id of a table.
    pub fn next_id(&self, seq: Seq) -> StateResult<u64> {
        self.bump(seq.key())
    }

    /// Advance and return the store revision.
    pub fn next_revision(&self) -> StateResult<u64> {
        self.bump(REVISION_KEY)
    }

    pub fn put_app(&self, app: &App) -> StateResult<()> {
        self.put(APPS, "apps", &id_key(app.id), app)
    }

    pub fn put_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        self.put(CLUSTERS, "clusters", &id_key(cluster.id), cluster)
    }

    pub fn put_namespace(&self, namespace: &Namespace) -> StateResult<()> {
        self.put(NAMESPACES, "namespaces", &id_key(namespace.id), namespace)
    }

    pub fn put_item(&self, item: &ConfigItem) -> StateResult<()> {
        self.put(ITEMS, "items", &scoped_key(item.namespace_id, item.id), item)
    }

    pub fn put_release(&self, release: &Release) -> StateResult<()> {
        self.put(RELEASES, "releases", &id_key(release.id), release)
    }

    pub fn put_history(&self, entry: &ReleaseHistory) -> StateResult<()> {
        self.put(
            RELEASE_HISTORY,
            "release_history",
            &scoped_key(entry.namespace_id, entry.id),
            entry,
        )
    }

    pub fn put_commit(&self, commit: &Commit) -> StateResult<()> {
        self.put(COMMITS, "commits", &scoped_key(commit.namespace_id, commit.id), commit)
    }

    pub fn put_record(&self, record: &AuditRecord) -> StateResult<()> {
        self.put(RECORDS, "records", &id_key(record.id), record)
    }

    pub fn put_instance(&self, row: &InstanceRow) -> StateResult<()> {
        self.put(INSTANCES, "instances", &id_key(row.id), row)
    }
}
