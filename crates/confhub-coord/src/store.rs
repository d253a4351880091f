//! The coordination store contract.
//!
//! A flat string key space with prefix reads and prefix watches. Registry
//! attributes live at `{prefix}{id}/{attr}`; watchers subscribe to the
//! prefix and receive every put and delete below it.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CoordResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub key: String,
    /// Empty for deletes.
    pub value: String,
    /// The put created the key rather than overwriting it.
    pub is_create: bool,
}

/// One batch of events delivered to a watcher.
///
/// A response with `canceled` set is the last one on its stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchResponse {
    pub events: Vec<WatchEvent>,
    pub canceled: bool,
}

pub type WatchStream = mpsc::UnboundedReceiver<WatchResponse>;

#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> CoordResult<Option<String>>;

    /// All keys starting with `prefix`, in key order.
    async fn get_with_prefix(&self, prefix: &str) -> CoordResult<Vec<KeyValue>>;

    /// Store `value` under `key`. Returns true if the key was created.
    async fn put(&self, key: &str, value: &str) -> CoordResult<bool>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> CoordResult<bool>;

    /// Returns the number of keys removed.
    async fn delete_with_prefix(&self, prefix: &str) -> CoordResult<usize>;

    /// Subscribe to changes below `prefix` until `cancel` fires.
    async fn watch(&self, prefix: &str, cancel: CancellationToken) -> CoordResult<WatchStream>;
}
