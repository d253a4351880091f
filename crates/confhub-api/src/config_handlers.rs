//! Config server handlers: client protocol, item editing, versioning
//! and topology.

use axum::Json;
use axum::extract::State;
use axum::response::Response;
use confhub_core::wire::{
    AppDetailRequest, CreateAppRequest, CreateClusterRequest, CreateItemRequest,
    CreateNamespaceRequest, DeleteItemRequest, DetailRequest, ExitRequest, HistoryRequest,
    InstanceListRequest, ListRequest, NamespaceRequest, ReleaseRequest, RollbackRequest,
    SyncRequest, UpdateItemRequest, WatchRequest,
};
use confhub_server::{ConfigError, ServerContext};
use tracing::debug;

use crate::response::reply;

// ── Client protocol ────────────────────────────────────────────

/// POST /api/v1/client/config/watch
///
/// Holds the request open until a release or the long-poll timeout.
pub async fn watch(State(ctx): State<ServerContext>, Json(req): Json<WatchRequest>) -> Response {
    reply(ctx.watch.watch(&req).await)
}

/// POST /api/v1/client/config/list
pub async fn pull(State(ctx): State<ServerContext>, Json(req): Json<ListRequest>) -> Response {
    reply(
        ctx.engine
            .list_by_app(&req.app, req.cluster.as_deref(), req.instance_id),
    )
}

/// POST /api/v1/client/exit
pub async fn exit(State(ctx): State<ServerContext>, Json(req): Json<ExitRequest>) -> Response {
    let known = ctx.watch.exit(req.instance_id);
    debug!(instance_id = req.instance_id, known, "client exit");
    reply(Ok::<_, ConfigError>("ok"))
}

// ── Items ──────────────────────────────────────────────────────

/// POST /api/v1/config/detail
pub async fn item_detail(State(ctx): State<ServerContext>, Json(req): Json<DetailRequest>) -> Response {
    reply(ctx.engine.get_item(req.id))
}

/// POST /api/v1/config/list
pub async fn list_items(
    State(ctx): State<ServerContext>,
    Json(req): Json<NamespaceRequest>,
) -> Response {
    reply(ctx.engine.list_effective(req.namespace_id))
}

/// POST /api/v1/config/create
pub async fn create_item(
    State(ctx): State<ServerContext>,
    Json(req): Json<CreateItemRequest>,
) -> Response {
    reply(
        ctx.engine
            .create_item(req.namespace_id, &req.key, &req.value, &req.comment, &req.user_id),
    )
}

/// POST /api/v1/config/update
pub async fn update_item(
    State(ctx): State<ServerContext>,
    Json(req): Json<UpdateItemRequest>,
) -> Response {
    reply(
        ctx.engine
            .update_item(req.namespace_id, &req.key, &req.value, &req.comment, &req.user_id),
    )
}

/// POST /api/v1/config/delete
pub async fn delete_item(
    State(ctx): State<ServerContext>,
    Json(req): Json<DeleteItemRequest>,
) -> Response {
    reply(ctx.engine.delete_item(req.namespace_id, &req.key, &req.user_id))
}

// ── Versioning ─────────────────────────────────────────────────

/// POST /api/v1/config/history
pub async fn history(State(ctx): State<ServerContext>, Json(req): Json<HistoryRequest>) -> Response {
    reply(ctx.engine.history(req.namespace_id, req.limit, req.offset))
}

/// POST /api/v1/config/release
pub async fn release(State(ctx): State<ServerContext>, Json(req): Json<ReleaseRequest>) -> Response {
    reply(
        ctx.engine
            .release(req.namespace_id, &req.name, &req.comment, &req.user_id),
    )
}

/// POST /api/v1/config/release/history
pub async fn release_history(
    State(ctx): State<ServerContext>,
    Json(req): Json<HistoryRequest>,
) -> Response {
    reply(
        ctx.engine
            .release_history(req.namespace_id, req.limit, req.offset),
    )
}

/// POST /api/v1/config/rollback
pub async fn rollback(State(ctx): State<ServerContext>, Json(req): Json<RollbackRequest>) -> Response {
    reply(ctx.engine.rollback(req.namespace_id, &req.user_id))
}

/// POST /api/v1/config/sync
pub async fn sync(State(ctx): State<ServerContext>, Json(req): Json<SyncRequest>) -> Response {
    reply(
        ctx.engine
            .sync(req.namespace_id, &req.cluster_ids, &req.keys, &req.user_id),
    )
}

// ── Topology ───────────────────────────────────────────────────

/// POST /api/v1/instance/list
pub async fn list_instances(
    State(ctx): State<ServerContext>,
    Json(req): Json<InstanceListRequest>,
) -> Response {
    reply(ctx.engine.list_instances(req.app_id, req.cluster_id))
}

/// POST /api/v1/app/create
pub async fn create_app(State(ctx): State<ServerContext>, Json(req): Json<CreateAppRequest>) -> Response {
    reply(ctx.engine.create_app(&req.name, &req.user_id))
}

/// POST /api/v1/app/detail
pub async fn app_detail(State(ctx): State<ServerContext>, Json(req): Json<AppDetailRequest>) -> Response {
    reply(ctx.engine.app_detail(&req.name))
}

/// POST /api/v1/cluster/create
pub async fn create_cluster(
    State(ctx): State<ServerContext>,
    Json(req): Json<CreateClusterRequest>,
) -> Response {
    reply(ctx.engine.create_cluster(req.app_id, &req.name))
}

/// POST /api/v1/namespace/create
pub async fn create_namespace(
    State(ctx): State<ServerContext>,
    Json(req): Json<CreateNamespaceRequest>,
) -> Response {
    reply(
        ctx.engine
            .create_namespace(req.app_id, req.cluster_id, &req.name),
    )
}
