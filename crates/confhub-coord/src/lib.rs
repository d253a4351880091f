//! confhub-coord: the coordination store behind the discover registry.
//!
//! [`CoordinationStore`] is the backend contract (get, put, delete and
//! prefix watches). [`EmbeddedCoordStore`] implements it on redb for a
//! single discover node; [`Coordinator`] wraps any backend with per-call
//! deadlines and is what the rest of the system holds.

pub mod coordinator;
pub mod embedded;
pub mod error;
pub mod store;

pub use coordinator::{Coordinator, has_all_attrs, split_key};
pub use embedded::EmbeddedCoordStore;
pub use error::{CoordError, CoordResult};
pub use store::{CoordinationStore, EventKind, KeyValue, WatchEvent, WatchResponse, WatchStream};
