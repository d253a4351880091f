//! Error types for the confhub state store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Failures of the embedded store itself. Business rule violations are
/// reported by the callers of the store, not here.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("state table unavailable: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    #[error("cannot encode {table} row: {reason}")]
    Encode { table: &'static str, reason: String },

    #[error("corrupt {table} row {key}: {reason}")]
    Decode {
        table: &'static str,
        key: String,
        reason: String,
    },
}
