//! Apps, clusters, namespaces and the instance listing.

use confhub_core::{RunStatus, epoch_secs};
use confhub_state::{App, Cluster, Namespace, OpType, Seq};
use serde::Serialize;
use tracing::info;

use crate::engine::{ConfigEngine, audit, check_name, check_user};
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppDetail {
    pub app: App,
    pub clusters: Vec<Cluster>,
    pub namespaces: Vec<Namespace>,
}

/// A persisted client instance with its live status on this server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceView {
    pub id: u64,
    pub app_id: u64,
    pub cluster_id: u64,
    pub host: String,
    pub port: u16,
    pub status: RunStatus,
    pub release_history_id: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ConfigEngine {
    pub fn create_app(&self, name: &str, user_id: &str) -> ConfigResult<App> {
        let name = check_name("app name", name)?;
        check_user(user_id)?;

        let app = self.store.write(|tx| -> ConfigResult<App> {
            if tx.app_by_name(&name)?.is_some() {
                return Err(ConfigError::conflict(format!("app {name} already exists")));
            }
            let app = App {
                id: tx.next_id(Seq::App)?,
                name: name.clone(),
                created_by: user_id.to_string(),
                created_at: epoch_secs(),
            };
            tx.put_app(&app)?;
            audit(tx, "app", [app.id], OpType::Create, "", user_id)?;
            Ok(app)
        })?;
        info!(app_id = app.id, name = %app.name, "app created");
        Ok(app)
    }

    pub fn app_detail(&self, name: &str) -> ConfigResult<AppDetail> {
        self.store.read(|tx| -> ConfigResult<AppDetail> {
            let app = tx
                .app_by_name(name.trim())?
                .ok_or_else(|| ConfigError::not_found(format!("app {name}")))?;
            Ok(AppDetail {
                clusters: tx.clusters_for_app(app.id)?,
                namespaces: tx.namespaces_for_app(app.id)?,
                app,
            })
        })
    }

    pub fn create_cluster(&self, app_id: u64, name: &str) -> ConfigResult<Cluster> {
        let name = check_name("cluster name", name)?;

        let cluster = self.store.write(|tx| -> ConfigResult<Cluster> {
            tx.app(app_id)?
                .ok_or_else(|| ConfigError::not_found(format!("app {app_id}")))?;
            if tx.cluster_by_name(app_id, &name)?.is_some() {
                return Err(ConfigError::conflict(format!("cluster {name} already exists")));
            }
            let cluster = Cluster {
                id: tx.next_id(Seq::Cluster)?,
                app_id,
                name: name.clone(),
                created_at: epoch_secs(),
            };
            tx.put_cluster(&cluster)?;
            audit(tx, "cluster", [cluster.id], OpType::Create, "", "")?;
            Ok(cluster)
        })?;
        info!(app_id, cluster_id = cluster.id, name = %cluster.name, "cluster created");
        Ok(cluster)
    }

    pub fn create_namespace(
        &self,
        app_id: u64,
        cluster_id: u64,
        name: &str,
    ) -> ConfigResult<Namespace> {
        let name = check_name("namespace name", name)?;

        let namespace = self.store.write(|tx| -> ConfigResult<Namespace> {
            tx.app(app_id)?
                .ok_or_else(|| ConfigError::not_found(format!("app {app_id}")))?;
            let cluster = tx
                .cluster(cluster_id)?
                .ok_or_else(|| ConfigError::not_found(format!("cluster {cluster_id}")))?;
            if cluster.app_id != app_id {
                return Err(ConfigError::validation(format!(
                    "cluster {cluster_id} does not belong to app {app_id}"
                )));
            }
            if tx.namespace_by_name(app_id, cluster_id, &name)?.is_some() {
                return Err(ConfigError::conflict(format!("namespace {name} already exists")));
            }
            let namespace = Namespace {
                id: tx.next_id(Seq::Namespace)?,
                app_id,
                cluster_id,
                name: name.clone(),
                created_at: epoch_secs(),
            };
            tx.put_namespace(&namespace)?;
            audit(tx, "namespace", [namespace.id], OpType::Create, "", "")?;
            Ok(namespace)
        })?;
        info!(app_id, cluster_id, namespace_id = namespace.id, name = %namespace.name, "namespace created");
        Ok(namespace)
    }

    /// Known instances, optionally narrowed to one app and cluster.
    pub fn list_instances(
        &self,
        app_id: Option<u64>,
        cluster_id: Option<u64>,
    ) -> ConfigResult<Vec<InstanceView>> {
        let rows = self.store.read(|tx| tx.instances())?;
        Ok(rows
            .into_iter()
            .filter(|row| app_id.is_none_or(|id| row.app_id == id))
            .filter(|row| cluster_id.is_none_or(|id| row.cluster_id == id))
            .map(|row| InstanceView {
                status: self.instances.status_of(row.id).unwrap_or(RunStatus::Offline),
                id: row.id,
                app_id: row.app_id,
                cluster_id: row.cluster_id,
                host: row.host,
                port: row.port,
                release_history_id: row.release_history_id,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect())
    }
}
