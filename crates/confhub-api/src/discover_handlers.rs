//! Discover registry handlers, shared by the server and client registries.

use axum::Json;
use axum::extract::State;
use axum::response::Response;
use confhub_core::Role;
use confhub_core::wire::{FetchRequest, HeartbeatRequest, InstanceList, RegisterRequest};
use confhub_discover::{DiscoverContext, DiscoverError};
use tracing::debug;

use crate::response::{ok, reply};

/// Handler state: the discover context plus the registry a route targets.
#[derive(Clone)]
pub struct RoleState {
    pub ctx: DiscoverContext,
    pub role: Role,
}

/// POST /api/v1/discover/{role}/register
pub async fn register(State(state): State<RoleState>, Json(req): Json<RegisterRequest>) -> Response {
    let result = state
        .ctx
        .register(state.role, req)
        .await
        .map(|record| record.id);
    reply(result)
}

/// POST /api/v1/discover/{role}/heartbeat
pub async fn heartbeat(
    State(state): State<RoleState>,
    Json(req): Json<HeartbeatRequest>,
) -> Response {
    debug!(role = ?state.role, id = %req.id, status = ?req.status, "heartbeat");
    let result: Result<&str, DiscoverError> = state
        .ctx
        .heartbeat(state.role, &req.id, req.status)
        .await
        .map(|()| "ok");
    reply(result)
}

/// POST /api/v1/discover/{role}/fetch
pub async fn fetch(State(state): State<RoleState>, Json(req): Json<FetchRequest>) -> Response {
    ok(InstanceList {
        list: state.ctx.fetch(state.role, req.env),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use confhub_coord::{Coordinator, EmbeddedCoordStore};
    use confhub_core::{EnvType, RunStatus};
    use std::sync::Arc;

    fn state(role: Role) -> RoleState {
        let coord = Coordinator::new(Arc::new(EmbeddedCoordStore::open_in_memory().unwrap()));
        RoleState {
            ctx: DiscoverContext::new(coord),
            role,
        }
    }

    fn register_req(id: &str) -> RegisterRequest {
        RegisterRequest {
            id: id.to_string(),
            host: "10.0.0.2".to_string(),
            port: 8600,
            cluster: "default".to_string(),
            env: EnvType::Develop,
        }
    }

    #[tokio::test]
    async fn register_then_fetch() {
        let state = state(Role::Server);
        let resp = register(State(state.clone()), Json(register_req("s1"))).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = fetch(State(state.clone()), Json(FetchRequest::default())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.ctx.fetch(Role::Server, None).len(), 1);
    }

    #[tokio::test]
    async fn register_without_id_is_rejected() {
        let state = state(Role::Client);
        let resp = register(State(state), Json(register_req(""))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_instance_is_404() {
        let state = state(Role::Server);
        let resp = heartbeat(
            State(state),
            Json(HeartbeatRequest {
                id: "ghost".to_string(),
                status: None,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn offline_heartbeat_hides_instance() {
        let state = state(Role::Server);
        register(State(state.clone()), Json(register_req("s1"))).await;
        let resp = heartbeat(
            State(state.clone()),
            Json(HeartbeatRequest {
                id: "s1".to_string(),
                status: Some(RunStatus::Offline),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.ctx.fetch(Role::Server, None).is_empty());
    }
}
