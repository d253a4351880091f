//! Shared domain enums and the registry instance record.
//!
//! Every enum serializes to the lowercase wire strings used by the
//! coordination store attributes and the HTTP API.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of liveness ticks an online instance survives without a heartbeat.
pub const INSTANCE_MAX_LIFE: u32 = 60;

/// A value that failed to parse into one of the shared enums.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// ── Run status ─────────────────────────────────────────────────────

/// Liveness status of a registered server, client or connected instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Offline,
    Online,
    Break,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Offline => "offline",
            RunStatus::Online => "online",
            RunStatus::Break => "break",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(RunStatus::Offline),
            "online" => Ok(RunStatus::Online),
            "break" => Ok(RunStatus::Break),
            other => Err(UnknownVariant {
                kind: "run status",
                value: other.to_string(),
            }),
        }
    }
}

// ── Environment ────────────────────────────────────────────────────

/// Deployment environment a server serves and a client runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EnvType {
    #[default]
    #[serde(rename = "develop")]
    Develop,
    #[serde(rename = "test")]
    Test,
    #[serde(rename = "product")]
    Product,
}

impl EnvType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvType::Develop => "develop",
            EnvType::Test => "test",
            EnvType::Product => "product",
        }
    }
}

impl fmt::Display for EnvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "develop" => Ok(EnvType::Develop),
            "test" => Ok(EnvType::Test),
            "product" => Ok(EnvType::Product),
            other => Err(UnknownVariant {
                kind: "env",
                value: other.to_string(),
            }),
        }
    }
}

// ── Operations and watch events ────────────────────────────────────

/// Kind of change applied to a config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpType::Create => "create",
            OpType::Update => "update",
            OpType::Delete => "delete",
        })
    }
}

/// Outcome of a long-poll watch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventType {
    /// The wait expired without a change.
    Nothing,
    /// A targeted change; clients treat it like a full refresh.
    ConfigChange,
    /// The client must pull the full config list.
    RefreshAll,
}

// ── Registry record ────────────────────────────────────────────────

/// A server or client as tracked by the discover registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub env: EnvType,
    #[serde(default)]
    pub status: RunStatus,
    /// Remaining liveness ticks; only meaningful in memory.
    #[serde(default)]
    pub life: u32,
}

impl InstanceRecord {
    /// An empty record for `id`, filled attribute by attribute.
    pub fn empty(id: &str) -> Self {
        Self {
            id: id.to_string(),
            host: String::new(),
            port: 0,
            cluster: String::new(),
            env: EnvType::default(),
            status: RunStatus::Offline,
            life: 0,
        }
    }

    /// `host:port` as dialled by HTTP clients.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_online(&self) -> bool {
        self.status == RunStatus::Online
    }
}

/// Deterministic registry id for an endpoint.
///
/// The same process restarting on the same address keeps its id, so the
/// registry entry is overwritten instead of duplicated.
pub fn endpoint_id(kind: &str, parts: &[&str]) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for part in parts {
        part.hash(&mut hasher);
    }
    format!("{kind}-{:08x}", hasher.finish() as u32)
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_round_trips_through_strings() {
        for status in [RunStatus::Offline, RunStatus::Online, RunStatus::Break] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "paused".parse::<RunStatus>().unwrap_err();
        assert_eq!(err.value, "paused");
        assert!(err.to_string().contains("run status"));
    }

    #[test]
    fn env_uses_long_names_on_the_wire() {
        assert_eq!(serde_json::to_string(&EnvType::Product).unwrap(), "\"product\"");
        assert_eq!("develop".parse::<EnvType>().unwrap(), EnvType::Develop);
        assert!("prod".parse::<EnvType>().is_err());
    }

    #[test]
    fn watch_event_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&WatchEventType::RefreshAll).unwrap(),
            "\"refresh_all\""
        );
    }

    #[test]
    fn endpoint_id_is_stable() {
        let a = endpoint_id("server", &["10.0.0.1", "8080", "develop"]);
        let b = endpoint_id("server", &["10.0.0.1", "8080", "develop"]);
        let c = endpoint_id("server", &["10.0.0.1", "8081", "develop"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("server-"));
    }

    #[test]
    fn record_defaults_when_attributes_missing() {
        let rec: InstanceRecord =
            serde_json::from_str(r#"{"id":"s1","host":"h","port":1}"#).unwrap();
        assert_eq!(rec.status, RunStatus::Offline);
        assert_eq!(rec.life, 0);
        assert_eq!(rec.address(), "h:1");
    }
}
