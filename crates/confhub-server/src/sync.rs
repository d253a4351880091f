//! Copy selected keys of a namespace into the same-named namespace of
//! other clusters. Targets are staged only; nothing is released.

use std::collections::BTreeSet;

use confhub_state::{CommitChange, ConfigItem};
use serde::Serialize;
use tracing::info;

use crate::engine::{
    ConfigEngine, check_namespace_id, check_user, commit_items, new_item, next_order,
    require_namespace, touch,
};
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncTarget {
    pub cluster_id: u64,
    pub namespace_id: u64,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub namespace_id: u64,
    pub targets: Vec<SyncTarget>,
}

impl ConfigEngine {
    pub fn sync(
        &self,
        namespace_id: u64,
        cluster_ids: &[u64],
        keys: &[String],
        user_id: &str,
    ) -> ConfigResult<SyncSummary> {
        check_namespace_id(namespace_id)?;
        check_user(user_id)?;
        let cluster_ids: BTreeSet<u64> = cluster_ids.iter().copied().collect();
        let keys: BTreeSet<&str> = keys.iter().map(|k| k.trim()).filter(|k| !k.is_empty()).collect();
        if cluster_ids.is_empty() {
            return Err(ConfigError::validation("cluster_ids must not be empty"));
        }
        if keys.is_empty() {
            return Err(ConfigError::validation("keys must not be empty"));
        }

        let summary = self.store.write(|tx| -> ConfigResult<SyncSummary> {
            let source = require_namespace(tx, namespace_id)?;
            if cluster_ids.contains(&source.cluster_id) {
                return Err(ConfigError::validation(
                    "target clusters must not include the source cluster",
                ));
            }

            let source_items = tx.items(namespace_id)?;
            let mut picked: Vec<&ConfigItem> = Vec::with_capacity(keys.len());
            for key in &keys {
                let item = source_items
                    .iter()
                    .find(|i| i.key == *key && !i.is_deleted)
                    .ok_or_else(|| ConfigError::not_found(format!("key {key} in namespace {namespace_id}")))?;
                picked.push(item);
            }

            let mut targets = Vec::with_capacity(cluster_ids.len());
            for &cluster_id in &cluster_ids {
                let cluster = tx
                    .cluster(cluster_id)?
                    .filter(|c| c.app_id == source.app_id)
                    .ok_or_else(|| ConfigError::not_found(format!("cluster {cluster_id}")))?;
                let target = tx
                    .namespace_by_name(source.app_id, cluster.id, &source.name)?
                    .ok_or_else(|| {
                        ConfigError::not_found(format!(
                            "namespace {} in cluster {}",
                            source.name, cluster.name
                        ))
                    })?;

                let existing = tx.items(target.id)?;
                let mut order_num = next_order(&existing);
                let mut created = Vec::new();
                let mut updated = Vec::new();
                let mut unchanged = 0;

                for src in &picked {
                    match existing.iter().find(|i| i.key == src.key) {
                        Some(current) if !current.is_deleted && current.value == src.value => {
                            unchanged += 1;
                        }
                        Some(current) => {
                            let mut item = current.clone();
                            item.value = src.value.clone();
                            item.is_deleted = false;
                            touch(tx, &mut item, user_id)?;
                            tx.put_item(&item)?;
                            updated.push(item);
                        }
                        None => {
                            let item = new_item(
                                tx,
                                target.id,
                                &src.key,
                                &src.value,
                                &src.comment,
                                order_num,
                                user_id,
                            )?;
                            order_num += 1;
                            tx.put_item(&item)?;
                            created.push(item);
                        }
                    }
                }

                let outcome = SyncTarget {
                    cluster_id,
                    namespace_id: target.id,
                    created: created.len(),
                    updated: updated.len(),
                    unchanged,
                };
                commit_items(tx, target.id, CommitChange::Create(created), user_id)?;
                commit_items(tx, target.id, CommitChange::Update(updated), user_id)?;
                targets.push(outcome);
            }

            Ok(SyncSummary {
                namespace_id,
                targets,
            })
        })?;

        info!(
            namespace_id,
            targets = summary.targets.len(),
            keys = keys.len(),
            "config items synced"
        );
        Ok(summary)
    }
}
