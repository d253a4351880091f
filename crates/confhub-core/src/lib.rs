//! confhub-core: shared vocabulary for the confhub config center.
//!
//! Holds the enums and wire messages every process speaks, the TOML
//! configuration, and the small pieces of task plumbing (supervisor,
//! backoff, HTTP client) the daemons and the client runtime share.

pub mod backoff;
pub mod config;
pub mod discover_client;
pub mod http;
pub mod supervise;
pub mod types;
pub mod wire;

pub use backoff::Backoff;
pub use config::CenterConfig;
pub use discover_client::{DiscoverClient, Role};
pub use http::HttpError;
pub use supervise::supervise;
pub use types::*;
