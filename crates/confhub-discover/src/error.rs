//! Error types for the discover registries.

use confhub_coord::CoordError;
use thiserror::Error;

pub type DiscoverResult<T> = Result<T, DiscoverError>;

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{kind} {id} not registered")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    UnknownStatus(#[from] confhub_core::UnknownVariant),

    #[error(transparent)]
    Coord(#[from] CoordError),
}
