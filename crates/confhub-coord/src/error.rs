//! Error types for the coordination store.

use std::time::Duration;

use thiserror::Error;

pub type CoordResult<T> = Result<T, CoordError>;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("coordination store {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("coordination backend error: {0}")]
    Backend(String),

    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
}
