//! Coordinator: bounded-time access to a coordination backend.
//!
//! Single-key operations get a short deadline, batches a longer one. A
//! batch stops at the first failing key; keys written before it stay
//! written.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{CoordError, CoordResult};
use crate::store::{CoordinationStore, KeyValue, WatchStream};

#[derive(Clone)]
pub struct Coordinator {
    backend: Arc<dyn CoordinationStore>,
    op_timeout: Duration,
    batch_timeout: Duration,
}

impl Coordinator {
    pub fn new(backend: Arc<dyn CoordinationStore>) -> Self {
        Self {
            backend,
            op_timeout: Duration::from_secs(1),
            batch_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub async fn get(&self, key: &str) -> CoordResult<Option<String>> {
        bounded("get", self.op_timeout, self.backend.get(key)).await
    }

    pub async fn get_with_prefix(&self, prefix: &str) -> CoordResult<Vec<KeyValue>> {
        bounded(
            "get_with_prefix",
            self.batch_timeout,
            self.backend.get_with_prefix(prefix),
        )
        .await
    }

    pub async fn put(&self, key: &str, value: &str) -> CoordResult<bool> {
        bounded("put", self.op_timeout, self.backend.put(key, value)).await
    }

    pub async fn put_many(&self, kvs: &[(String, String)]) -> CoordResult<()> {
        let backend = &self.backend;
        bounded("put_many", self.batch_timeout, async move {
            for (key, value) in kvs {
                if let Err(e) = backend.put(key, value).await {
                    warn!(%key, error = %e, "batch put aborted");
                    return Err(e);
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, key: &str) -> CoordResult<bool> {
        bounded("delete", self.op_timeout, self.backend.delete(key)).await
    }

    pub async fn delete_with_prefix(&self, prefix: &str) -> CoordResult<usize> {
        bounded(
            "delete_with_prefix",
            self.batch_timeout,
            self.backend.delete_with_prefix(prefix),
        )
        .await
    }

    pub async fn watch(&self, prefix: &str, cancel: CancellationToken) -> CoordResult<WatchStream> {
        bounded("watch", self.op_timeout, self.backend.watch(prefix, cancel)).await
    }
}

async fn bounded<T>(
    op: &'static str,
    limit: Duration,
    fut: impl Future<Output = CoordResult<T>>,
) -> CoordResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoordError::Timeout { op, after: limit }),
    }
}

/// Split `{prefix}{id}/{attr}` into `(id, attr)`.
///
/// Anything other than exactly two non-empty segments after the prefix
/// is rejected.
pub fn split_key(prefix: &str, key: &str) -> CoordResult<(String, String)> {
    let rest = key.strip_prefix(prefix).ok_or_else(|| CoordError::InvalidKey {
        key: key.to_string(),
        reason: "outside watched prefix",
    })?;

    let mut parts = rest.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some(attr), None) if !id.is_empty() && !attr.is_empty() => {
            Ok((id.to_string(), attr.to_string()))
        }
        _ => Err(CoordError::InvalidKey {
            key: key.to_string(),
            reason: "expected {id}/{attr}",
        }),
    }
}

/// True if `kvs` holds every attribute in `required` under `{prefix}{id}/`.
pub fn has_all_attrs(kvs: &[KeyValue], prefix: &str, id: &str, required: &[&str]) -> bool {
    let base = format!("{prefix}{id}/");
    required.iter().all(|attr| {
        let key = format!("{base}{attr}");
        kvs.iter().any(|kv| kv.key == key)
    })
}
