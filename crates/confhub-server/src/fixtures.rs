//! Shared test fixtures.

use std::sync::Arc;

use confhub_state::StateStore;

use crate::engine::ConfigEngine;
use crate::instances::InstanceTable;

pub(crate) fn empty_engine() -> ConfigEngine {
    ConfigEngine::new(
        StateStore::open_in_memory().unwrap(),
        Arc::new(InstanceTable::new()),
    )
}

/// App `billing` with clusters `default`, `gray` and `bare`; namespace
/// `application` exists in the first two.
pub(crate) struct World {
    pub engine: ConfigEngine,
    pub app: u64,
    pub cluster: u64,
    pub ns: u64,
    pub other_cluster: u64,
    pub other_ns: u64,
    pub bare_cluster: u64,
}

pub(crate) fn seeded_world() -> World {
    let engine = empty_engine();
    let app = engine.create_app("billing", "alice").unwrap();
    let cluster = engine.create_cluster(app.id, "default").unwrap();
    let other = engine.create_cluster(app.id, "gray").unwrap();
    let bare = engine.create_cluster(app.id, "bare").unwrap();
    let ns = engine.create_namespace(app.id, cluster.id, "application").unwrap();
    let other_ns = engine.create_namespace(app.id, other.id, "application").unwrap();
    World {
        engine,
        app: app.id,
        cluster: cluster.id,
        ns: ns.id,
        other_cluster: other.id,
        other_ns: other_ns.id,
        bare_cluster: bare.id,
    }
}

pub(crate) fn seeded_engine() -> (ConfigEngine, u64) {
    let world = seeded_world();
    (world.engine, world.ns)
}
