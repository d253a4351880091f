//! Minimal JSON-over-HTTP/1 client for calls between confhub processes.
//!
//! Each call opens a fresh connection, posts a JSON body and decodes the
//! [`ApiEnvelope`] response. The whole exchange is bounded by a timeout.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::wire::ApiEnvelope;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("http error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl HttpError {
    /// True when the remote answered with a business error rather than
    /// the call failing in transit.
    pub fn is_api(&self) -> bool {
        matches!(self, HttpError::Api { .. })
    }
}

/// POST `body` as JSON to `http://{address}{path}` and decode the payload.
pub async fn post_json<Req, Resp>(
    address: &str,
    path: &str,
    body: &Req,
    timeout: Duration,
) -> Result<Resp, HttpError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let payload = serde_json::to_vec(body)?;

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|source| HttpError::Connect {
                address: address.to_string(),
                source,
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "http connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(path)
            .header("host", address)
            .header("content-type", "application/json")
            .header("user-agent", concat!("confhub/", env!("CARGO_PKG_VERSION")))
            .body(Full::new(Bytes::from(payload)))?;

        let resp = sender.send_request(req).await?;
        let status = resp.status();
        let bytes = resp.into_body().collect().await?.to_bytes();

        let envelope: ApiEnvelope<Resp> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) if !status.is_success() => {
                return Err(HttpError::Api {
                    status: status.as_u16(),
                    message: format!("{status}: {e}"),
                });
            }
            Err(e) => return Err(e.into()),
        };

        envelope.into_data().map_err(|message| HttpError::Api {
            status: status.as_u16(),
            message,
        })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%address, %path, "request timed out");
            Err(HttpError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::http::StatusCode;
    use axum::routing::post;

    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn decodes_successful_envelope() {
        let router = axum::Router::new().route(
            "/echo",
            post(|Json(v): Json<serde_json::Value>| async move { Json(ApiEnvelope::ok(v)) }),
        );
        let addr = serve(router).await;

        let resp: serde_json::Value = post_json(
            &addr,
            "/echo",
            &serde_json::json!({"k": "v"}),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(resp["k"], "v");
    }

    #[tokio::test]
    async fn surfaces_api_error_message() {
        let router = axum::Router::new().route(
            "/fail",
            post(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(ApiEnvelope::<()>::failure("no new configs to release")),
                )
            }),
        );
        let addr = serve(router).await;

        let err = post_json::<_, String>(&addr, "/fail", &(), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            HttpError::Api { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "no new configs to release");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_connect_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = post_json::<_, String>(&addr, "/x", &(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Connect { .. }));
    }
}
