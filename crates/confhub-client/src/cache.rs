//! Durable snapshot of the last successful pull.
//!
//! The file holds `{"version": "1.0.0", "data": {...}}` and is replaced
//! through a temp file and a rename so a crash never leaves a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

pub const CACHE_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize, Deserialize)]
struct CacheDoc {
    version: String,
    data: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> ClientResult<BTreeMap<String, String>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| self.error(e))?;
        let doc: CacheDoc = serde_json::from_slice(&bytes).map_err(|e| self.error(e))?;
        if doc.version != CACHE_VERSION {
            return Err(self.error(format!("unsupported version {}", doc.version)));
        }
        debug!(path = %self.path.display(), keys = doc.data.len(), "cache loaded");
        Ok(doc.data)
    }

    pub async fn store(&self, data: &BTreeMap<String, String>) -> ClientResult<()> {
        let doc = CacheDoc {
            version: CACHE_VERSION.to_string(),
            data: data.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| self.error(e))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| self.error(e))?;
        }
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| self.error(e))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.error(e))?;
        debug!(path = %self.path.display(), keys = data.len(), "cache written");
        Ok(())
    }

    fn error(&self, reason: impl ToString) -> ClientError {
        ClientError::Cache {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheFile::new(dir.path().join("nested/billing.default.develop.cache.json"));
        let data = BTreeMap::from([("timeout".to_string(), "30".to_string())]);

        cache.store(&data).await.unwrap();
        assert_eq!(cache.load().await.unwrap(), data);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(cache.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], CACHE_VERSION);
        assert_eq!(raw["data"]["timeout"], "30");
        assert!(!cache.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn missing_or_foreign_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheFile::new(dir.path().join("absent.cache.json"));
        assert!(matches!(cache.load().await, Err(ClientError::Cache { .. })));

        std::fs::write(cache.path(), r#"{"version":"0.9","data":{}}"#).unwrap();
        assert!(matches!(cache.load().await, Err(ClientError::Cache { .. })));
    }
}
