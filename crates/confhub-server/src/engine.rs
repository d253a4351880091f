//! Config engine: item editing and the views derived from it.
//!
//! Every mutation is one [`StateStore::write`] unit: the item row, its
//! commit entry and the audit records land together or not at all. The
//! store admits a single writer, so `order_num` and `pre_release_id`
//! assignment never race.
//!
//! Releases, rollback and history live in `release.rs`, cross-cluster
//! sync in `sync.rs`, the client pull in `pull.rs`.

use std::collections::BTreeMap;
use std::sync::Arc;

use confhub_core::epoch_secs;
use confhub_state::{
    AuditRecord, Commit, CommitChange, ConfigItem, Namespace, OpType, Release, Seq, StateResult,
    StateStore, WriteTx,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::instances::InstanceTable;

pub(crate) const KEY_MAX: usize = 128;
pub(crate) const COMMENT_MAX: usize = 255;
pub(crate) const NAME_MAX: usize = 64;
const DEFAULT_PAGE: usize = 20;
const MAX_PAGE: usize = 100;

/// One page of a reverse-chronological listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub list: Vec<T>,
    pub total: usize,
    pub next_offset: Option<usize>,
}

impl<T> Page<T> {
    /// Page over `rows` given oldest first. A zero `limit` means the default.
    pub fn newest_first(mut rows: Vec<T>, limit: usize, offset: usize) -> Self {
        rows.reverse();
        let total = rows.len();
        let limit = if limit == 0 { DEFAULT_PAGE } else { limit.min(MAX_PAGE) };
        let list: Vec<T> = rows.into_iter().skip(offset).take(limit).collect();
        let end = offset.saturating_add(list.len());
        Self {
            next_offset: (end < total).then_some(end),
            list,
            total,
        }
    }
}

/// An item as it currently stands against the effective release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveItem {
    pub id: u64,
    pub key: String,
    pub value: String,
    pub comment: String,
    pub order_num: u32,
    /// Unreleased change, if any.
    pub pending: Option<OpType>,
    pub updated_by: String,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub namespace_id: u64,
    pub release_id: Option<u64>,
    pub items: Vec<EffectiveItem>,
}

/// Overlay item edits made after `base` onto its snapshot.
///
/// Items created and deleted since the release never surface.
pub(crate) fn overlay(items: &[ConfigItem], base: Option<&Release>) -> Vec<EffectiveItem> {
    let base_revision = base.map_or(0, |r| r.revision);
    let empty = BTreeMap::new();
    let snapshot = base.map_or(&empty, |r| &r.config);

    let mut out: Vec<EffectiveItem> = items
        .iter()
        .filter_map(|item| {
            let released = snapshot.get(&item.key);
            let (pending, value) = if item.revision <= base_revision {
                if item.is_deleted {
                    return None;
                }
                (None, item.value.clone())
            } else if item.is_deleted {
                (Some(OpType::Delete), released?.clone())
            } else if released.is_some() {
                (Some(OpType::Update), item.value.clone())
            } else {
                (Some(OpType::Create), item.value.clone())
            };
            Some(EffectiveItem {
                id: item.id,
                key: item.key.clone(),
                value,
                comment: item.comment.clone(),
                order_num: item.order_num,
                pending,
                updated_by: item.updated_by.clone(),
                updated_at: item.updated_at,
            })
        })
        .collect();
    out.sort_by_key(|i| (i.order_num, i.id));
    out
}

// ── Validation ─────────────────────────────────────────────────────

pub(crate) fn check_namespace_id(namespace_id: u64) -> ConfigResult<()> {
    if namespace_id == 0 {
        return Err(ConfigError::validation("namespace_id is required"));
    }
    Ok(())
}

pub(crate) fn check_key(key: &str) -> ConfigResult<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::validation("key is required"));
    }
    if key.chars().count() > KEY_MAX {
        return Err(ConfigError::validation(format!("key exceeds {KEY_MAX} characters")));
    }
    Ok(key.to_string())
}

pub(crate) fn check_comment(comment: &str) -> ConfigResult<()> {
    if comment.chars().count() > COMMENT_MAX {
        return Err(ConfigError::validation(format!(
            "comment exceeds {COMMENT_MAX} characters"
        )));
    }
    Ok(())
}

pub(crate) fn check_user(user_id: &str) -> ConfigResult<()> {
    if user_id.trim().is_empty() {
        return Err(ConfigError::validation("user_id is required"));
    }
    Ok(())
}

pub(crate) fn check_name(field: &str, name: &str) -> ConfigResult<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > NAME_MAX {
        return Err(ConfigError::validation(format!(
            "{field} must be 1 to {NAME_MAX} characters"
        )));
    }
    Ok(name.to_string())
}

// ── Write helpers ──────────────────────────────────────────────────

pub(crate) fn require_namespace(tx: &WriteTx, namespace_id: u64) -> ConfigResult<Namespace> {
    tx.namespace(namespace_id)?
        .ok_or_else(|| ConfigError::not_found(format!("namespace {namespace_id}")))
}

pub(crate) fn next_order(items: &[ConfigItem]) -> u32 {
    items.iter().map(|i| i.order_num).max().unwrap_or(0) + 1
}

/// Append one audit record per touched row.
pub(crate) fn audit(
    tx: &WriteTx,
    table: &str,
    row_ids: impl IntoIterator<Item = u64>,
    op_type: OpType,
    comment: &str,
    user_id: &str,
) -> StateResult<()> {
    let now = epoch_secs();
    for row_id in row_ids {
        tx.put_record(&AuditRecord {
            id: tx.next_id(Seq::Record)?,
            table: table.to_string(),
            row_id,
            op_type,
            comment: comment.to_string(),
            user_id: user_id.to_string(),
            created_at: now,
        })?;
    }
    Ok(())
}

/// Append a commit for a non-empty batch and audit its items.
pub(crate) fn commit_items(
    tx: &WriteTx,
    namespace_id: u64,
    change: CommitChange,
    user_id: &str,
) -> StateResult<()> {
    if change.items().is_empty() {
        return Ok(());
    }
    let op_type = change.op();
    let ids: Vec<u64> = change.items().iter().map(|i| i.id).collect();
    tx.put_commit(&Commit {
        id: tx.next_id(Seq::Commit)?,
        namespace_id,
        change,
        created_by: user_id.to_string(),
        created_at: epoch_secs(),
    })?;
    audit(tx, "item", ids, op_type, "", user_id)
}

/// Stamp `item` as touched by `user_id` at a fresh revision.
pub(crate) fn touch(tx: &WriteTx, item: &mut ConfigItem, user_id: &str) -> StateResult<()> {
    item.revision = tx.next_revision()?;
    item.updated_by = user_id.to_string();
    item.updated_at = epoch_secs();
    Ok(())
}

/// A new item row at the end of its namespace's order.
pub(crate) fn new_item(
    tx: &WriteTx,
    namespace_id: u64,
    key: &str,
    value: &str,
    comment: &str,
    order_num: u32,
    user_id: &str,
) -> StateResult<ConfigItem> {
    let now = epoch_secs();
    Ok(ConfigItem {
        id: tx.next_id(Seq::Item)?,
        namespace_id,
        key: key.to_string(),
        value: value.to_string(),
        comment: comment.to_string(),
        order_num,
        is_deleted: false,
        revision: tx.next_revision()?,
        created_by: user_id.to_string(),
        created_at: now,
        updated_by: user_id.to_string(),
        updated_at: now,
    })
}

// ── Engine ─────────────────────────────────────────────────────────

/// Release and editing engine over the state store.
#[derive(Clone)]
pub struct ConfigEngine {
    pub(crate) store: StateStore,
    pub(crate) instances: Arc<InstanceTable>,
}

impl ConfigEngine {
    pub fn new(store: StateStore, instances: Arc<InstanceTable>) -> Self {
        Self { store, instances }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn instances(&self) -> &Arc<InstanceTable> {
        &self.instances
    }

    /// Add `key` to a namespace, resurrecting a soft-deleted row of the
    /// same key.
    pub fn create_item(
        &self,
        namespace_id: u64,
        key: &str,
        value: &str,
        comment: &str,
        user_id: &str,
    ) -> ConfigResult<ConfigItem> {
        check_namespace_id(namespace_id)?;
        let key = check_key(key)?;
        check_comment(comment)?;
        check_user(user_id)?;

        let item = self.store.write(|tx| -> ConfigResult<ConfigItem> {
            require_namespace(tx, namespace_id)?;
            let items = tx.items(namespace_id)?;
            let item = match items.iter().find(|i| i.key == key) {
                Some(existing) if !existing.is_deleted => {
                    return Err(ConfigError::conflict(format!("key {key} already exists")));
                }
                Some(existing) => {
                    let mut item = existing.clone();
                    item.is_deleted = false;
                    item.value = value.to_string();
                    item.comment = comment.to_string();
                    touch(tx, &mut item, user_id)?;
                    item
                }
                None => new_item(
                    tx,
                    namespace_id,
                    &key,
                    value,
                    comment,
                    next_order(&items),
                    user_id,
                )?,
            };
            tx.put_item(&item)?;
            commit_items(tx, namespace_id, CommitChange::Create(vec![item.clone()]), user_id)?;
            Ok(item)
        })?;

        info!(namespace_id, item_id = item.id, key = %item.key, order_num = item.order_num, "config item created");
        Ok(item)
    }

    /// Change the value and comment of an active item.
    ///
    /// Unchanged input leaves the item and the audit trail untouched.
    pub fn update_item(
        &self,
        namespace_id: u64,
        key: &str,
        value: &str,
        comment: &str,
        user_id: &str,
    ) -> ConfigResult<ConfigItem> {
        check_namespace_id(namespace_id)?;
        let key = check_key(key)?;
        check_comment(comment)?;
        check_user(user_id)?;

        self.store.write(|tx| -> ConfigResult<ConfigItem> {
            require_namespace(tx, namespace_id)?;
            let mut item = tx
                .item_by_key(namespace_id, &key)?
                .filter(|i| !i.is_deleted)
                .ok_or_else(|| ConfigError::not_found(format!("key {key}")))?;
            if item.value == value && item.comment == comment {
                debug!(namespace_id, %key, "config item unchanged");
                return Ok(item);
            }
            item.value = value.to_string();
            item.comment = comment.to_string();
            touch(tx, &mut item, user_id)?;
            tx.put_item(&item)?;
            commit_items(tx, namespace_id, CommitChange::Update(vec![item.clone()]), user_id)?;
            info!(namespace_id, item_id = item.id, %key, "config item updated");
            Ok(item)
        })
    }

    /// Soft-delete an active item.
    pub fn delete_item(&self, namespace_id: u64, key: &str, user_id: &str) -> ConfigResult<ConfigItem> {
        check_namespace_id(namespace_id)?;
        let key = check_key(key)?;
        check_user(user_id)?;

        self.store.write(|tx| -> ConfigResult<ConfigItem> {
            require_namespace(tx, namespace_id)?;
            let mut item = tx
                .item_by_key(namespace_id, &key)?
                .filter(|i| !i.is_deleted)
                .ok_or_else(|| ConfigError::not_found(format!("key {key}")))?;
            item.is_deleted = true;
            touch(tx, &mut item, user_id)?;
            tx.put_item(&item)?;
            commit_items(tx, namespace_id, CommitChange::Delete(vec![item.clone()]), user_id)?;
            info!(namespace_id, item_id = item.id, %key, "config item deleted");
            Ok(item)
        })
    }

    /// An active item by id.
    pub fn get_item(&self, id: u64) -> ConfigResult<ConfigItem> {
        self.store.read(|tx| -> ConfigResult<ConfigItem> {
            tx.item_by_id(id)?
                .filter(|i| !i.is_deleted)
                .ok_or_else(|| ConfigError::not_found(format!("config item {id}")))
        })
    }

    /// The effective release of a namespace with unreleased edits on top.
    pub fn list_effective(&self, namespace_id: u64) -> ConfigResult<EffectiveConfig> {
        check_namespace_id(namespace_id)?;
        self.store.read(|tx| -> ConfigResult<EffectiveConfig> {
            tx.namespace(namespace_id)?
                .ok_or_else(|| ConfigError::not_found(format!("namespace {namespace_id}")))?;
            let base = tx.effective_release(namespace_id)?;
            let items = tx.items(namespace_id)?;
            Ok(EffectiveConfig {
                namespace_id,
                release_id: base.as_ref().map(|(_, r)| r.id),
                items: overlay(&items, base.as_ref().map(|(_, r)| r)),
            })
        })
    }

    /// Commits of a namespace, newest first.
    pub fn history(&self, namespace_id: u64, limit: usize, offset: usize) -> ConfigResult<Page<Commit>> {
        check_namespace_id(namespace_id)?;
        self.store.read(|tx| -> ConfigResult<Page<Commit>> {
            tx.namespace(namespace_id)?
                .ok_or_else(|| ConfigError::not_found(format!("namespace {namespace_id}")))?;
            Ok(Page::newest_first(tx.commits(namespace_id)?, limit, offset))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::seeded_engine;

    #[test]
    fn paging_defaults_and_caps() {
        let page = Page::newest_first((1..=30).collect::<Vec<u32>>(), 0, 0);
        assert_eq!(page.list.len(), 20);
        assert_eq!(page.list[0], 30);
        assert_eq!(page.next_offset, Some(20));
        assert_eq!(page.total, 30);

        let last = Page::newest_first((1..=30).collect::<Vec<u32>>(), 20, 20);
        assert_eq!(last.list, (1..=10).rev().collect::<Vec<u32>>());
        assert_eq!(last.next_offset, None);

        let capped = Page::newest_first((1..=300).collect::<Vec<u32>>(), 500, 0);
        assert_eq!(capped.list.len(), 100);

        let beyond = Page::newest_first(vec![1, 2], 10, 50);
        assert!(beyond.list.is_empty());
        assert_eq!(beyond.next_offset, None);
    }

    #[test]
    fn create_validates_input() {
        let (engine, ns) = seeded_engine();
        let long_key = "k".repeat(KEY_MAX + 1);
        let long_comment = "c".repeat(COMMENT_MAX + 1);
        for (key, comment, user) in [
            ("   ", "", "alice"),
            (long_key.as_str(), "", "alice"),
            ("ok", long_comment.as_str(), "alice"),
            ("ok", "", " "),
        ] {
            let err = engine.create_item(ns, key, "v", comment, user).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)), "{key:?} {user:?}");
        }
        let err = engine.create_item(0, "ok", "v", "", "alice").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        let err = engine.create_item(999, "ok", "v", "", "alice").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn duplicate_active_key_conflicts() {
        let (engine, ns) = seeded_engine();
        engine.create_item(ns, "timeout", "30", "", "alice").unwrap();
        let err = engine.create_item(ns, " timeout ", "40", "", "alice").unwrap_err();
        assert!(matches!(err, ConfigError::Conflict(_)));
    }

    #[test]
    fn deleted_key_is_resurrected_with_same_id() {
        let (engine, ns) = seeded_engine();
        let first = engine.create_item(ns, "timeout", "30", "", "alice").unwrap();
        engine.create_item(ns, "retries", "3", "", "alice").unwrap();
        engine.delete_item(ns, "timeout", "bob").unwrap();

        let again = engine.create_item(ns, "timeout", "45", "new", "carol").unwrap();
        assert_eq!(again.id, first.id);
        assert!(!again.is_deleted);
        assert_eq!(again.value, "45");
        assert_eq!(again.updated_by, "carol");
    }

    #[test]
    fn order_numbers_increase() {
        let (engine, ns) = seeded_engine();
        let a = engine.create_item(ns, "a", "1", "", "alice").unwrap();
        let b = engine.create_item(ns, "b", "2", "", "alice").unwrap();
        let c = engine.create_item(ns, "c", "3", "", "alice").unwrap();
        assert!(a.order_num < b.order_num && b.order_num < c.order_num);
    }

    #[test]
    fn unchanged_update_writes_nothing() {
        let (engine, ns) = seeded_engine();
        let item = engine.create_item(ns, "timeout", "30", "secs", "alice").unwrap();
        let same = engine.update_item(ns, "timeout", "30", "secs", "bob").unwrap();
        assert_eq!(same.revision, item.revision);
        assert_eq!(engine.history(ns, 0, 0).unwrap().total, 1);

        let changed = engine.update_item(ns, "timeout", "60", "secs", "bob").unwrap();
        assert!(changed.revision > item.revision);
        assert_eq!(changed.updated_by, "bob");
        assert_eq!(engine.history(ns, 0, 0).unwrap().total, 2);
    }

    #[test]
    fn update_and_delete_need_active_item() {
        let (engine, ns) = seeded_engine();
        let err = engine.update_item(ns, "missing", "1", "", "alice").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));

        engine.create_item(ns, "gone", "1", "", "alice").unwrap();
        engine.delete_item(ns, "gone", "alice").unwrap();
        let err = engine.delete_item(ns, "gone", "alice").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn get_item_hides_deleted() {
        let (engine, ns) = seeded_engine();
        let item = engine.create_item(ns, "timeout", "30", "", "alice").unwrap();
        assert_eq!(engine.get_item(item.id).unwrap().key, "timeout");
        engine.delete_item(ns, "timeout", "alice").unwrap();
        assert!(matches!(engine.get_item(item.id), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn history_records_each_mutation_newest_first() {
        let (engine, ns) = seeded_engine();
        engine.create_item(ns, "timeout", "30", "", "alice").unwrap();
        engine.update_item(ns, "timeout", "31", "", "alice").unwrap();
        engine.delete_item(ns, "timeout", "alice").unwrap();

        let page = engine.history(ns, 0, 0).unwrap();
        let ops: Vec<OpType> = page.list.iter().map(|c| c.change.op()).collect();
        assert_eq!(ops, vec![OpType::Delete, OpType::Update, OpType::Create]);

        let records = engine.store().read(|tx| tx.records()).unwrap();
        assert_eq!(records.iter().filter(|r| r.table == "item").count(), 3);
    }

    #[test]
    fn effective_view_tags_unreleased_edits() {
        let (engine, ns) = seeded_engine();
        engine.create_item(ns, "keep", "1", "", "alice").unwrap();
        engine.create_item(ns, "change", "1", "", "alice").unwrap();
        engine.create_item(ns, "drop", "1", "", "alice").unwrap();
        engine.release(ns, "v1", "", "alice").unwrap();

        engine.update_item(ns, "change", "2", "", "alice").unwrap();
        engine.delete_item(ns, "drop", "alice").unwrap();
        engine.create_item(ns, "fresh", "1", "", "alice").unwrap();
        engine.create_item(ns, "ghost", "1", "", "alice").unwrap();
        engine.delete_item(ns, "ghost", "alice").unwrap();

        let view = engine.list_effective(ns).unwrap();
        let tags: BTreeMap<&str, (Option<OpType>, &str)> = view
            .items
            .iter()
            .map(|i| (i.key.as_str(), (i.pending, i.value.as_str())))
            .collect();
        assert_eq!(tags.len(), 4);
        assert_eq!(tags["keep"], (None, "1"));
        assert_eq!(tags["change"], (Some(OpType::Update), "2"));
        assert_eq!(tags["drop"], (Some(OpType::Delete), "1"));
        assert_eq!(tags["fresh"], (Some(OpType::Create), "1"));
    }

    #[test]
    fn effective_view_before_any_release() {
        let (engine, ns) = seeded_engine();
        engine.create_item(ns, "a", "1", "", "alice").unwrap();
        let view = engine.list_effective(ns).unwrap();
        assert_eq!(view.release_id, None);
        assert_eq!(view.items[0].pending, Some(OpType::Create));
    }
}
