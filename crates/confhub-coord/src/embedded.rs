//! EmbeddedCoordStore: a single-node coordination store on redb.
//!
//! Keys and values are plain strings in one table. Every committed put or
//! delete is fanned out to the subscribers whose prefix matches, in
//! commit order.
//!
//! ```text
//!   put/delete ──▶ redb write txn ──commit──▶ publish ──▶ subscriber 1 (prefix a/)
//!                                                    └──▶ subscriber 2 (prefix b/)
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CoordError, CoordResult};
use crate::store::{
    CoordinationStore, EventKind, KeyValue, WatchEvent, WatchResponse, WatchStream,
};

const KV: TableDefinition<&str, &str> = TableDefinition::new("coord_kv");

macro_rules! backend_err {
    () => {
        |e| CoordError::Backend(e.to_string())
    };
}

struct Subscriber {
    id: u64,
    prefix: String,
    tx: mpsc::UnboundedSender<WatchResponse>,
}

#[derive(Clone)]
pub struct EmbeddedCoordStore {
    db: Arc<Database>,
    /// Also serializes writers so events are published in commit order.
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_subscriber: Arc<AtomicU64>,
}

impl EmbeddedCoordStore {
    pub fn open(path: &Path) -> CoordResult<Self> {
        let db = Database::create(path).map_err(backend_err!())?;
        let store = Self::from_database(db)?;
        debug!(?path, "coordination store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> CoordResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(backend_err!())?;
        Self::from_database(db)
    }

    fn from_database(db: Database) -> CoordResult<Self> {
        let txn = db.begin_write().map_err(backend_err!())?;
        txn.open_table(KV).map_err(backend_err!())?;
        txn.commit().map_err(backend_err!())?;
        Ok(Self {
            db: Arc::new(db),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Number of live watch subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.lock_subscribers();
        subs.retain(|s| !s.tx.is_closed());
        subs.len()
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(subs: &mut Vec<Subscriber>, events: Vec<WatchEvent>) {
        if events.is_empty() {
            return;
        }
        subs.retain(|s| !s.tx.is_closed());
        for sub in subs.iter() {
            let matching: Vec<WatchEvent> = events
                .iter()
                .filter(|e| e.key.starts_with(&sub.prefix))
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }
            let _ = sub.tx.send(WatchResponse {
                events: matching,
                canceled: false,
            });
        }
    }

    fn matching_keys(&self, prefix: &str) -> CoordResult<Vec<KeyValue>> {
        let txn = self.db.begin_read().map_err(backend_err!())?;
        let table = txn.open_table(KV).map_err(backend_err!())?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(backend_err!())? {
            let (key, value) = entry.map_err(backend_err!())?;
            if key.value().starts_with(prefix) {
                results.push(KeyValue {
                    key: key.value().to_string(),
                    value: value.value().to_string(),
                });
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl CoordinationStore for EmbeddedCoordStore {
    async fn get(&self, key: &str) -> CoordResult<Option<String>> {
        let txn = self.db.begin_read().map_err(backend_err!())?;
        let table = txn.open_table(KV).map_err(backend_err!())?;
        let value = table
            .get(key)
            .map_err(backend_err!())?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }

    async fn get_with_prefix(&self, prefix: &str) -> CoordResult<Vec<KeyValue>> {
        self.matching_keys(prefix)
    }

    async fn put(&self, key: &str, value: &str) -> CoordResult<bool> {
        if key.is_empty() {
            return Err(CoordError::InvalidKey {
                key: key.to_string(),
                reason: "empty key",
            });
        }

        let mut subs = self.lock_subscribers();
        let txn = self.db.begin_write().map_err(backend_err!())?;
        let existed;
        {
            let mut table = txn.open_table(KV).map_err(backend_err!())?;
            existed = table.insert(key, value).map_err(backend_err!())?.is_some();
        }
        txn.commit().map_err(backend_err!())?;

        Self::publish(
            &mut subs,
            vec![WatchEvent {
                kind: EventKind::Put,
                key: key.to_string(),
                value: value.to_string(),
                is_create: !existed,
            }],
        );
        debug!(%key, created = !existed, "coord key stored");
        Ok(!existed)
    }

    async fn delete(&self, key: &str) -> CoordResult<bool> {
        let mut subs = self.lock_subscribers();
        let txn = self.db.begin_write().map_err(backend_err!())?;
        let existed;
        {
            let mut table = txn.open_table(KV).map_err(backend_err!())?;
            existed = table.remove(key).map_err(backend_err!())?.is_some();
        }
        txn.commit().map_err(backend_err!())?;

        if existed {
            Self::publish(
                &mut subs,
                vec![WatchEvent {
                    kind: EventKind::Delete,
                    key: key.to_string(),
                    value: String::new(),
                    is_create: false,
                }],
            );
        }
        Ok(existed)
    }

    async fn delete_with_prefix(&self, prefix: &str) -> CoordResult<usize> {
        let mut subs = self.lock_subscribers();
        let keys: Vec<String> = self
            .matching_keys(prefix)?
            .into_iter()
            .map(|kv| kv.key)
            .collect();

        let txn = self.db.begin_write().map_err(backend_err!())?;
        {
            let mut table = txn.open_table(KV).map_err(backend_err!())?;
            for key in &keys {
                table.remove(key.as_str()).map_err(backend_err!())?;
            }
        }
        txn.commit().map_err(backend_err!())?;

        let events = keys
            .iter()
            .map(|key| WatchEvent {
                kind: EventKind::Delete,
                key: key.clone(),
                value: String::new(),
                is_create: false,
            })
            .collect();
        Self::publish(&mut subs, events);
        debug!(%prefix, removed = keys.len(), "coord prefix deleted");
        Ok(keys.len())
    }

    async fn watch(&self, prefix: &str, cancel: CancellationToken) -> CoordResult<WatchStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.lock_subscribers().push(Subscriber {
            id,
            prefix: prefix.to_string(),
            tx: tx.clone(),
        });

        let subscribers = self.subscribers.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = tx.send(WatchResponse { events: Vec::new(), canceled: true });
                }
                _ = tx.closed() => {}
            }
            subscribers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retain(|s| s.id != id);
            debug!(subscriber = id, "watch subscription closed");
        });

        debug!(%prefix, subscriber = id, "watch subscription opened");
        Ok(rx)
    }
}
