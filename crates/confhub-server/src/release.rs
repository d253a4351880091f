//! Releases, rollback and the release history chain.
//!
//! ```text
//!   history:  #1 normal  R1 (pre: -)
//!             #2 normal  R2 (pre: R1)
//!             #3 rollback R1 (pre: R2)      R2 marked superseded
//!             #4 normal  R3 (pre: R2)       effective = R3
//! ```
//!
//! The effective release of a namespace is the one named by its latest
//! normal entry. A rollback rewrites the live items to an earlier
//! snapshot and records where it came from; it takes effect for clients
//! only once the next release is published.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use confhub_core::epoch_secs;
use confhub_state::{
    CommitChange, OpType, Release, ReleaseHistory, ReleaseOpType, Seq,
};
use serde::Serialize;
use tracing::info;

use crate::engine::{
    ConfigEngine, Page, audit, check_comment, check_name, check_namespace_id, check_user,
    commit_items, new_item, next_order, require_namespace, touch,
};
use crate::error::{ConfigError, ConfigResult};

/// Change of one key between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseChange {
    pub key: String,
    pub op: OpType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseHistoryView {
    pub id: u64,
    pub release_id: u64,
    pub pre_release_id: Option<u64>,
    pub op_type: ReleaseOpType,
    pub release_name: String,
    pub release_comment: String,
    pub created_by: String,
    pub created_at: u64,
    pub changes: Vec<ReleaseChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    pub history_id: u64,
    /// Release whose snapshot the items now hold.
    pub release_id: u64,
    /// Release that was rolled back from.
    pub abandoned_release_id: u64,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Per-key difference from `old` to `new`, by key.
pub fn diff_snapshots(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> Vec<ReleaseChange> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let before = old.get(key);
            let after = new.get(key);
            let op = match (before, after) {
                (None, Some(_)) => OpType::Create,
                (Some(_), None) => OpType::Delete,
                (Some(a), Some(b)) if a != b => OpType::Update,
                _ => return None,
            };
            Some(ReleaseChange {
                key: key.clone(),
                op,
                old_value: before.cloned(),
                new_value: after.cloned(),
            })
        })
        .collect()
}

impl ConfigEngine {
    /// Snapshot the active items of a namespace as its new effective
    /// release and wake every connected instance.
    pub fn release(
        &self,
        namespace_id: u64,
        name: &str,
        comment: &str,
        user_id: &str,
    ) -> ConfigResult<Release> {
        check_namespace_id(namespace_id)?;
        let name = check_name("release name", name)?;
        check_comment(comment)?;
        check_user(user_id)?;

        let (release, history) = self.store.write(|tx| -> ConfigResult<(Release, ReleaseHistory)> {
            let namespace = require_namespace(tx, namespace_id)?;
            let base = tx.effective_release(namespace_id)?;
            let base_revision = base.as_ref().map_or(0, |(_, r)| r.revision);

            let items = tx.items(namespace_id)?;
            if !items.iter().any(|i| i.revision > base_revision) {
                return Err(ConfigError::conflict("no new configs to release"));
            }

            let now = epoch_secs();
            let release = Release {
                id: tx.next_id(Seq::Release)?,
                namespace_id,
                app_id: namespace.app_id,
                cluster_id: namespace.cluster_id,
                name: name.clone(),
                comment: comment.to_string(),
                config: items
                    .iter()
                    .filter(|i| !i.is_deleted)
                    .map(|i| (i.key.clone(), i.value.clone()))
                    .collect(),
                revision: tx.revision()?,
                superseded: false,
                created_by: user_id.to_string(),
                created_at: now,
            };
            let history = ReleaseHistory {
                id: tx.next_id(Seq::History)?,
                namespace_id,
                release_id: release.id,
                pre_release_id: base.map(|(entry, _)| entry.release_id),
                op_type: ReleaseOpType::Normal,
                created_by: user_id.to_string(),
                created_at: now,
            };
            tx.put_release(&release)?;
            tx.put_history(&history)?;
            audit(tx, "release", [release.id], OpType::Create, comment, user_id)?;
            audit(tx, "release_history", [history.id], OpType::Create, "", user_id)?;
            Ok((release, history))
        })?;

        let woken = self.instances.broadcast();
        info!(
            namespace_id,
            release_id = release.id,
            pre_release_id = ?history.pre_release_id,
            keys = release.config.len(),
            woken,
            "release published"
        );
        Ok(release)
    }

    /// Restore the live items of a namespace to the release before the
    /// current one.
    pub fn rollback(&self, namespace_id: u64, user_id: &str) -> ConfigResult<RollbackSummary> {
        check_namespace_id(namespace_id)?;
        check_user(user_id)?;

        let summary = self.store.write(|tx| -> ConfigResult<RollbackSummary> {
            require_namespace(tx, namespace_id)?;
            let latest = tx
                .latest_history(namespace_id)?
                .ok_or_else(|| ConfigError::conflict("namespace has never been released"))?;
            let current_id = latest.release_id;
            let origin = tx
                .normal_history_for_release(namespace_id, current_id)?
                .ok_or_else(|| ConfigError::not_found(format!("history of release {current_id}")))?;
            let target_id = origin
                .pre_release_id
                .ok_or_else(|| ConfigError::conflict("first version cannot be rolled back"))?;
            let target = tx
                .release(target_id)?
                .ok_or_else(|| ConfigError::not_found(format!("release {target_id}")))?;
            let mut abandoned = tx
                .release(current_id)?
                .ok_or_else(|| ConfigError::not_found(format!("release {current_id}")))?;

            let items = tx.items(namespace_id)?;
            let known: HashSet<&str> = items.iter().map(|i| i.key.as_str()).collect();
            let mut updated = Vec::new();
            let mut deleted = Vec::new();
            let mut created = Vec::new();

            for existing in &items {
                let mut item = existing.clone();
                match target.config.get(&item.key) {
                    Some(value) if item.is_deleted || item.value != *value => {
                        item.value = value.clone();
                        item.is_deleted = false;
                        touch(tx, &mut item, user_id)?;
                        tx.put_item(&item)?;
                        updated.push(item);
                    }
                    None if !item.is_deleted => {
                        item.is_deleted = true;
                        touch(tx, &mut item, user_id)?;
                        tx.put_item(&item)?;
                        deleted.push(item);
                    }
                    _ => {}
                }
            }

            let mut order_num = next_order(&items);
            for (key, value) in &target.config {
                if known.contains(key.as_str()) {
                    continue;
                }
                let item = new_item(tx, namespace_id, key, value, "", order_num, user_id)?;
                order_num += 1;
                tx.put_item(&item)?;
                created.push(item);
            }

            let summary_counts = (created.len(), updated.len(), deleted.len());
            commit_items(tx, namespace_id, CommitChange::Create(created), user_id)?;
            commit_items(tx, namespace_id, CommitChange::Update(updated), user_id)?;
            commit_items(tx, namespace_id, CommitChange::Delete(deleted), user_id)?;

            abandoned.superseded = true;
            tx.put_release(&abandoned)?;
            let history = ReleaseHistory {
                id: tx.next_id(Seq::History)?,
                namespace_id,
                release_id: target_id,
                pre_release_id: Some(current_id),
                op_type: ReleaseOpType::Rollback,
                created_by: user_id.to_string(),
                created_at: epoch_secs(),
            };
            tx.put_history(&history)?;
            audit(tx, "release", [current_id], OpType::Update, "superseded by rollback", user_id)?;
            audit(tx, "release_history", [history.id], OpType::Create, "", user_id)?;

            Ok(RollbackSummary {
                history_id: history.id,
                release_id: target_id,
                abandoned_release_id: current_id,
                created: summary_counts.0,
                updated: summary_counts.1,
                deleted: summary_counts.2,
            })
        })?;

        info!(
            namespace_id,
            from = summary.abandoned_release_id,
            to = summary.release_id,
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            "namespace rolled back"
        );
        Ok(summary)
    }

    /// Release history, newest first, with each entry's key changes.
    pub fn release_history(
        &self,
        namespace_id: u64,
        limit: usize,
        offset: usize,
    ) -> ConfigResult<Page<ReleaseHistoryView>> {
        check_namespace_id(namespace_id)?;
        self.store.read(|tx| -> ConfigResult<Page<ReleaseHistoryView>> {
            tx.namespace(namespace_id)?
                .ok_or_else(|| ConfigError::not_found(format!("namespace {namespace_id}")))?;
            let page = Page::newest_first(tx.release_history(namespace_id)?, limit, offset);

            let mut list = Vec::with_capacity(page.list.len());
            for entry in page.list {
                let release = tx.release(entry.release_id)?.ok_or_else(|| {
                    ConfigError::not_found(format!("release {}", entry.release_id))
                })?;
                let previous = match entry.pre_release_id {
                    Some(id) => tx.release(id)?.map(|r| r.config).unwrap_or_default(),
                    None => BTreeMap::new(),
                };
                list.push(ReleaseHistoryView {
                    id: entry.id,
                    release_id: entry.release_id,
                    pre_release_id: entry.pre_release_id,
                    op_type: entry.op_type,
                    changes: diff_snapshots(&previous, &release.config),
                    release_name: release.name,
                    release_comment: release.comment,
                    created_by: entry.created_by,
                    created_at: entry.created_at,
                });
            }
            Ok(Page {
                list,
                total: page.total,
                next_offset: page.next_offset,
            })
        })
    }
}
