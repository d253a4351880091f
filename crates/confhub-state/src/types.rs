//! Persisted rows of the config center.
//!
//! Ids are allocated from per-table sequences and never reused. Item
//! writes and releases are additionally stamped with a store-wide
//! `revision`, which orders "changed after the last release" without
//! relying on wall-clock resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use confhub_core::OpType;

// ── Topology ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: u64,
    pub name: String,
    pub created_by: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: u64,
    pub app_id: u64,
    pub name: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: u64,
    pub app_id: u64,
    pub cluster_id: u64,
    pub name: String,
    pub created_at: u64,
}

// ── Items ──────────────────────────────────────────────────────────

/// A live, editable key/value in one namespace. Soft-deleted, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigItem {
    pub id: u64,
    pub namespace_id: u64,
    pub key: String,
    pub value: String,
    pub comment: String,
    pub order_num: u32,
    pub is_deleted: bool,
    pub revision: u64,
    pub created_by: String,
    pub created_at: u64,
    pub updated_by: String,
    pub updated_at: u64,
}

// ── Releases ───────────────────────────────────────────────────────

/// Immutable snapshot of a namespace's active items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: u64,
    pub namespace_id: u64,
    pub app_id: u64,
    pub cluster_id: u64,
    pub name: String,
    pub comment: String,
    pub config: BTreeMap<String, String>,
    /// Store revision at snapshot time.
    pub revision: u64,
    /// Set once a rollback moved away from this release.
    pub superseded: bool,
    pub created_by: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseOpType {
    Normal,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseHistory {
    pub id: u64,
    pub namespace_id: u64,
    pub release_id: u64,
    pub pre_release_id: Option<u64>,
    pub op_type: ReleaseOpType,
    pub created_by: String,
    pub created_at: u64,
}

// ── Audit trail ────────────────────────────────────────────────────

/// Item rows touched by one create, update or delete batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "items", rename_all = "lowercase")]
pub enum CommitChange {
    Create(Vec<ConfigItem>),
    Update(Vec<ConfigItem>),
    Delete(Vec<ConfigItem>),
}

impl CommitChange {
    pub fn op(&self) -> OpType {
        match self {
            CommitChange::Create(_) => OpType::Create,
            CommitChange::Update(_) => OpType::Update,
            CommitChange::Delete(_) => OpType::Delete,
        }
    }

    pub fn items(&self) -> &[ConfigItem] {
        match self {
            CommitChange::Create(items)
            | CommitChange::Update(items)
            | CommitChange::Delete(items) => items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: u64,
    pub namespace_id: u64,
    pub change: CommitChange,
    pub created_by: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: u64,
    pub table: String,
    pub row_id: u64,
    pub op_type: OpType,
    pub comment: String,
    pub user_id: String,
    pub created_at: u64,
}

// ── Client instances ───────────────────────────────────────────────

/// Durable identity of a client process, keyed by its endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRow {
    pub id: u64,
    pub app_id: u64,
    pub cluster_id: u64,
    pub host: String,
    pub port: u16,
    /// Newest release history entry this instance has pulled.
    pub release_history_id: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_change_is_tagged() {
        let change = CommitChange::Delete(Vec::new());
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["op"], "delete");
        assert!(json["items"].as_array().unwrap().is_empty());
        assert_eq!(change.op(), OpType::Delete);
    }
}
