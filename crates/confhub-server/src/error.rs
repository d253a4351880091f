//! Error types for the config server.

use confhub_state::StateError;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StateError),
}

impl ConfigError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        ConfigError::Validation(msg.into())
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        ConfigError::NotFound(what.into())
    }

    pub(crate) fn conflict(msg: impl Into<String>) -> Self {
        ConfigError::Conflict(msg.into())
    }
}
