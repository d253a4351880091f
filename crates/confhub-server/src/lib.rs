//! confhub-server: the config server.
//!
//! ```text
//!  admin ──► create_item / update_item / delete_item ──► commits
//!                                   │
//!                              release() ──► Release + ReleaseHistory
//!                                   │
//!                     InstanceTable::broadcast()
//!                                   │
//!            parked watch ◄── ChangeSignal ──► refresh_all ──► client pull
//! ```
//!
//! Edits accumulate on a namespace until a release snapshots them. Each
//! release wakes every parked long-poll, and clients then pull the full
//! effective config. Rollback moves the namespace back one release and
//! restores the working items to that snapshot.

pub mod admin;
pub mod context;
pub mod engine;
pub mod error;
pub mod instances;
pub mod longpoll;
pub mod notify;
pub mod pull;
pub mod registration;
pub mod release;
pub mod sync;

#[cfg(test)]
mod fixtures;

pub use admin::{AppDetail, InstanceView};
pub use context::ServerContext;
pub use engine::{ConfigEngine, EffectiveConfig, EffectiveItem, Page};
pub use error::{ConfigError, ConfigResult};
pub use instances::{Admission, ConnectedInstance, InstanceTable, run_instance_sweep};
pub use longpoll::{DEFAULT_WATCH_TIMEOUT, WatchService};
pub use notify::ChangeSignal;
pub use registration::ServerRegistration;
pub use release::{ReleaseChange, ReleaseHistoryView, RollbackSummary, diff_snapshots};
pub use sync::{SyncSummary, SyncTarget};
