//! Envelope helpers and the error → status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use confhub_core::wire::ApiEnvelope;
use confhub_discover::DiscoverError;
use confhub_server::ConfigError;
use serde::Serialize;
use tracing::error;

/// Status code an error is reported with.
pub trait ApiError: std::fmt::Display {
    fn status(&self) -> StatusCode;
}

impl ApiError for ConfigError {
    fn status(&self) -> StatusCode {
        match self {
            ConfigError::Validation(_) => StatusCode::BAD_REQUEST,
            ConfigError::NotFound(_) => StatusCode::NOT_FOUND,
            ConfigError::Conflict(_) => StatusCode::CONFLICT,
            ConfigError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiError for DiscoverError {
    fn status(&self) -> StatusCode {
        match self {
            DiscoverError::Validation(_) | DiscoverError::UnknownStatus(_) => StatusCode::BAD_REQUEST,
            DiscoverError::NotFound { .. } => StatusCode::NOT_FOUND,
            DiscoverError::Coord(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub fn ok<T: Serialize>(data: T) -> Response {
    Json(ApiEnvelope::ok(data)).into_response()
}

pub fn error_response(msg: &str, status: StatusCode) -> Response {
    (status, Json(ApiEnvelope::<()>::failure(msg))).into_response()
}

/// Render a handler result.
pub fn reply<T, E>(result: Result<T, E>) -> Response
where
    T: Serialize,
    E: ApiError,
{
    match result {
        Ok(data) => ok(data),
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                error!(error = %e, "request failed");
            }
            error_response(&e.to_string(), status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_statuses() {
        let cases = [
            (ConfigError::Validation("key is required".into()), StatusCode::BAD_REQUEST),
            (ConfigError::NotFound("namespace 9".into()), StatusCode::NOT_FOUND),
            (ConfigError::Conflict("no new configs to release".into()), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(reply::<(), _>(Err(err)).status(), status);
        }
    }

    #[test]
    fn discover_not_found_is_404() {
        let err = DiscoverError::NotFound {
            kind: "server",
            id: "s1".into(),
        };
        assert_eq!(reply::<(), _>(Err(err)).status(), StatusCode::NOT_FOUND);
    }
}
