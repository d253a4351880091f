//! Full config pull for client instances.

use confhub_core::epoch_secs;
use confhub_core::wire::{ClientConfigList, ConfigPair, NamespaceConfig, NamespaceRef};
use confhub_state::{InstanceRow, OpType};
use tracing::debug;

use crate::engine::{ConfigEngine, audit};
use crate::error::{ConfigError, ConfigResult};

impl ConfigEngine {
    /// Effective items of every namespace of `app`, optionally narrowed
    /// to one cluster.
    ///
    /// When `instance_id` is given it must belong to the app; its row is
    /// stamped with the newest release history entry served.
    pub fn list_by_app(
        &self,
        app: &str,
        cluster: Option<&str>,
        instance_id: Option<u64>,
    ) -> ConfigResult<ClientConfigList> {
        let app = app.trim();
        if app.is_empty() {
            return Err(ConfigError::validation("app is required"));
        }

        let (list, newest, instance) = self.store.read(
            |tx| -> ConfigResult<(ClientConfigList, Option<u64>, Option<InstanceRow>)> {
                let app_row = tx
                    .app_by_name(app)?
                    .ok_or_else(|| ConfigError::not_found(format!("app {app}")))?;

                let instance = match instance_id {
                    Some(id) => match tx.instance(id)? {
                        Some(row) if row.app_id == app_row.id => Some(row),
                        _ => {
                            return Err(ConfigError::validation(format!(
                                "instance {id} does not belong to app {app}"
                            )));
                        }
                    },
                    None => None,
                };

                let cluster_id = match cluster.map(str::trim).filter(|c| !c.is_empty()) {
                    Some(name) => Some(
                        tx.cluster_by_name(app_row.id, name)?
                            .ok_or_else(|| ConfigError::not_found(format!("cluster {name}")))?
                            .id,
                    ),
                    None => None,
                };

                let mut list = ClientConfigList::default();
                let mut newest: Option<u64> = None;
                for namespace in tx.namespaces_for_app(app_row.id)? {
                    if cluster_id.is_some_and(|id| id != namespace.cluster_id) {
                        continue;
                    }
                    let items = match tx.effective_release(namespace.id)? {
                        Some((entry, release)) => {
                            newest = newest.max(Some(entry.id));
                            release
                                .config
                                .into_iter()
                                .map(|(key, value)| ConfigPair { key, value })
                                .collect()
                        }
                        None => Vec::new(),
                    };
                    list.list.push(NamespaceConfig {
                        namespace: NamespaceRef {
                            id: namespace.id,
                            name: namespace.name,
                        },
                        items,
                    });
                }
                Ok((list, newest, instance))
            },
        )?;

        if let Some(row) = instance {
            if row.release_history_id != newest {
                self.store.write(|tx| -> ConfigResult<()> {
                    let Some(mut row) = tx.instance(row.id)? else {
                        return Ok(());
                    };
                    row.release_history_id = newest;
                    row.updated_at = epoch_secs();
                    tx.put_instance(&row)?;
                    audit(tx, "instance", [row.id], OpType::Update, "config pulled", "")?;
                    Ok(())
                })?;
                debug!(instance_id = row.id, release_history_id = ?newest, "instance caught up");
            }
        }
        Ok(list)
    }
}
