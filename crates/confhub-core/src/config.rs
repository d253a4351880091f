//! confhub.toml configuration parser.
//!
//! One file configures all three roles; each role only reads its own
//! section and every field falls back to a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::EnvType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CenterConfig {
    pub discover: DiscoverSettings,
    pub server: ServerSettings,
    pub client: ClientSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverSettings {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Liveness sweep interval for both registries, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for DiscoverSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8500,
            data_dir: PathBuf::from("/var/lib/confhub/discover"),
            sweep_interval_ms: 3_000,
        }
    }
}

impl DiscoverSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address other processes dial; also the bind address.
    pub host: String,
    pub port: u16,
    pub env: EnvType,
    pub data_dir: PathBuf,
    /// `host:port` of the discover service.
    pub discover_addr: String,
    pub watch_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Connected-instance liveness sweep interval, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8600,
            env: EnvType::Develop,
            data_dir: PathBuf::from("/var/lib/confhub/server"),
            discover_addr: "127.0.0.1:8500".to_string(),
            watch_timeout_secs: 45,
            heartbeat_interval_secs: 10,
            sweep_interval_ms: 1_000,
        }
    }
}

impl ServerSettings {
    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub app: String,
    pub cluster: String,
    pub env: EnvType,
    /// Advertised address of the client process.
    pub host: String,
    pub port: u16,
    pub discover_addr: String,
    pub cache_dir: PathBuf,
    /// Start from the cached snapshot when the first pull fails.
    pub use_cache: bool,
    pub request_timeout_secs: u64,
    /// Must exceed the server's long-poll timeout.
    pub watch_timeout_secs: u64,
    pub pull_interval_secs: u64,
    pub rediscover_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            app: String::new(),
            cluster: "default".to_string(),
            env: EnvType::Develop,
            host: "127.0.0.1".to_string(),
            port: 0,
            discover_addr: "127.0.0.1:8500".to_string(),
            cache_dir: PathBuf::from("."),
            use_cache: true,
            request_timeout_secs: 10,
            watch_timeout_secs: 60,
            pull_interval_secs: 300,
            rediscover_interval_secs: 300,
            heartbeat_interval_secs: 10,
            backoff_base_ms: 1_000,
            backoff_max_secs: 300,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs)
    }

    pub fn rediscover_interval(&self) -> Duration {
        Duration::from_secs(self.rediscover_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    /// File name of the durable snapshot for this app/cluster/env.
    pub fn cache_file_name(&self) -> String {
        format!("{}.{}.{}.cache.json", self.app, self.cluster, self.env)
    }
}

impl CenterConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CenterConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: CenterConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.watch_timeout(), Duration::from_secs(45));
        assert_eq!(config.discover.sweep_interval(), Duration::from_secs(3));
        assert_eq!(config.client.pull_interval(), Duration::from_secs(300));
        assert!(config.client.use_cache);
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[server]
port = 9000
env = "product"

[client]
app = "billing"
cluster = "east"
env = "product"
use_cache = false
"#;
        let config: CenterConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.env, EnvType::Product);
        assert_eq!(config.server.heartbeat_interval(), Duration::from_secs(10));
        assert!(!config.client.use_cache);
        assert_eq!(config.client.cache_file_name(), "billing.east.product.cache.json");
    }

    #[test]
    fn from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confhub.toml");
        let mut config = CenterConfig::default();
        config.discover.port = 18500;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = CenterConfig::from_file(&path).unwrap();
        assert_eq!(loaded.discover.port, 18500);
    }
}
