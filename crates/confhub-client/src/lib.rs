//! confhub-client: runtime embedded in applications that read config.
//!
//! A [`ConfigClient`] finds an online config server through the discover
//! service, keeps a long-poll open against it and mirrors the pulled
//! config into a local table and a cache file. When nothing is reachable
//! at startup it can start from that cache and catch up later.

pub mod cache;
pub mod client;
pub mod error;
pub mod listen;
pub mod table;
pub mod transport;

pub use cache::{CACHE_VERSION, CacheFile};
pub use client::ConfigClient;
pub use error::{ClientError, ClientResult};
pub use listen::Listener;
pub use table::{Change, ConfigTable};
pub use transport::{ConfigTransport, HttpTransport};
