//! confhub-discover: service registry for config servers and clients.
//!
//! Two registries (servers and clients) are persisted in the coordination
//! store and mirrored into concurrent in-memory tables. Instances report
//! liveness through heartbeats; a periodic sweep demotes silent instances
//! to `break`. Store watchers keep every discover replica's table in sync
//! with writes made by its peers.

pub mod context;
pub mod error;
pub mod liveness;
pub mod registry;
pub mod watcher;

pub use context::DiscoverContext;
pub use error::{DiscoverError, DiscoverResult};
pub use liveness::run_liveness;
pub use registry::{CLIENTS, RegistryKind, RegistryTable, SERVERS};
pub use watcher::{RegistryWatcher, Watcher, run_watch};
