//! Error types for the client runtime.

use std::path::PathBuf;

use confhub_core::{EnvType, HttpError};
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(HttpError),

    /// The remote answered but refused the request.
    #[error("request rejected ({status}): {message}")]
    Protocol { status: u16, message: String },

    #[error("no online config server for env {0}")]
    NoServer(EnvType),

    #[error("cache {path}: {reason}")]
    Cache { path: PathBuf, reason: String },

    #[error("startup failed: {0}")]
    Startup(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Protocol { status: 404, .. })
    }
}

impl From<HttpError> for ClientError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Api { status, message } => ClientError::Protocol { status, message },
            other => ClientError::Transport(other),
        }
    }
}
