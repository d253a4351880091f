//! confhub-state: embedded state store for the config center.
//!
//! Backed by [redb](https://docs.rs/redb), holds apps, clusters,
//! namespaces, config items, releases, release history, commits, audit
//! records and client instance rows.
//!
//! # Architecture
//!
//! All rows are JSON-serialized into redb's `&[u8]` value columns.
//! Per-namespace rows use composite keys (`{namespace_id}/{id}`) so a
//! namespace is one prefix scan. Callers work in closures passed to
//! [`StateStore::read`] and [`StateStore::write`]; a write closure that
//! returns an error leaves no trace.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{ReadTx, StateStore, WriteTx};
pub use tables::Seq;
pub use types::*;
