//! JSON request and response bodies shared by the HTTP API and its callers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{EnvType, InstanceRecord, RunStatus, WatchEventType};

/// Response wrapper for consistent API format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }

    /// Unwrap the payload, turning a failed envelope into its message.
    pub fn into_data(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err("response carried no data".to_string()),
            (false, _) => Err(self.error.unwrap_or_else(|| "unknown error".to_string())),
        }
    }
}

// ── Discover ───────────────────────────────────────────────────────

/// POST /api/v1/discover/{server,client}/register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub env: EnvType,
}

/// POST /api/v1/discover/{server,client}/heartbeat
///
/// `status` defaults to online; a departing process reports offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

/// POST /api/v1/discover/{server,client}/fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceList {
    pub list: Vec<InstanceRecord>,
}

// ── Client protocol ────────────────────────────────────────────────

/// POST /api/v1/client/config/watch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchRequest {
    pub app: String,
    pub cluster: String,
    pub env: EnvType,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchReply {
    pub event: WatchEventType,
    pub instance_id: u64,
}

/// POST /api/v1/client/config/list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRef {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPair {
    pub key: String,
    pub value: String,
}

/// Effective items of one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub namespace: NamespaceRef,
    pub items: Vec<ConfigPair>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfigList {
    pub list: Vec<NamespaceConfig>,
}

impl ClientConfigList {
    /// Merge every namespace into one key/value map.
    ///
    /// A key present in several namespaces takes the value of the last one.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        self.list
            .iter()
            .flat_map(|ns| ns.items.iter())
            .map(|pair| (pair.key.clone(), pair.value.clone()))
            .collect()
    }
}

/// POST /api/v1/client/exit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRequest {
    pub instance_id: u64,
}

// ── Administration ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateItemRequest {
    pub namespace_id: u64,
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub comment: String,
    pub user_id: String,
}

pub type UpdateItemRequest = CreateItemRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteItemRequest {
    pub namespace_id: u64,
    pub key: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRequest {
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRequest {
    pub namespace_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub namespace_id: u64,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub namespace_id: u64,
    pub name: String,
    #[serde(default)]
    pub comment: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub namespace_id: u64,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub namespace_id: u64,
    pub cluster_ids: Vec<u64>,
    pub keys: Vec<String>,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceListRequest {
    #[serde(default)]
    pub app_id: Option<u64>,
    #[serde(default)]
    pub cluster_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDetailRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    pub app_id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNamespaceRequest {
    pub app_id: u64,
    pub cluster_id: u64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_envelope_yields_message() {
        let env: ApiEnvelope<u32> =
            serde_json::from_str(r#"{"success":false,"error":"namespace not found"}"#).unwrap();
        assert_eq!(env.into_data().unwrap_err(), "namespace not found");
    }

    #[test]
    fn ok_envelope_yields_data() {
        let body = serde_json::to_string(&ApiEnvelope::ok(WatchReply {
            event: WatchEventType::Nothing,
            instance_id: 7,
        }))
        .unwrap();
        let env: ApiEnvelope<WatchReply> = serde_json::from_str(&body).unwrap();
        assert_eq!(env.into_data().unwrap().instance_id, 7);
    }

    #[test]
    fn pulled_namespaces_flatten_in_order() {
        let pair = |k: &str, v: &str| ConfigPair {
            key: k.to_string(),
            value: v.to_string(),
        };
        let list = ClientConfigList {
            list: vec![
                NamespaceConfig {
                    namespace: NamespaceRef { id: 1, name: "application".to_string() },
                    items: vec![pair("timeout", "30"), pair("host", "db1")],
                },
                NamespaceConfig {
                    namespace: NamespaceRef { id: 2, name: "override".to_string() },
                    items: vec![pair("timeout", "45")],
                },
            ],
        };
        let flat = list.flatten();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat["timeout"], "45");
        assert_eq!(flat["host"], "db1");
    }

    #[test]
    fn heartbeat_status_is_optional() {
        let req: HeartbeatRequest = serde_json::from_str(r#"{"id":"server-1"}"#).unwrap();
        assert!(req.status.is_none());
    }
}
