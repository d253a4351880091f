//! confhub-api: HTTP surface of the discover service and config server.
//!
//! Every route is a JSON `POST`; responses use the
//! [`ApiEnvelope`](confhub_core::wire::ApiEnvelope) shape.
//!
//! # Discover routes
//!
//! | Path | Description |
//! |---|---|
//! | `/api/v1/discover/{server,client}/register` | Register an instance |
//! | `/api/v1/discover/{server,client}/heartbeat` | Refresh liveness or report a status |
//! | `/api/v1/discover/{server,client}/fetch` | Online instances, optionally by env |
//!
//! # Config server routes
//!
//! | Path | Description |
//! |---|---|
//! | `/api/v1/client/config/watch` | Long-poll for changes |
//! | `/api/v1/client/config/list` | Full effective config of an app |
//! | `/api/v1/client/exit` | Departing client notice |
//! | `/api/v1/config/{detail,list,create,update,delete}` | Item editing |
//! | `/api/v1/config/{history,release,release/history,rollback,sync}` | Versioning |
//! | `/api/v1/instance/list` | Known client instances |
//! | `/api/v1/{app,cluster,namespace}/create`, `/api/v1/app/detail` | Topology |

pub mod config_handlers;
pub mod discover_handlers;
pub mod response;

use axum::Router;
use axum::routing::post;
use confhub_core::Role;
use confhub_discover::DiscoverContext;
use confhub_server::ServerContext;

use crate::discover_handlers::RoleState;

/// Router served by the discover daemon.
pub fn discover_router(ctx: DiscoverContext) -> Router {
    let role_routes = |role: Role| {
        Router::new()
            .route("/register", post(discover_handlers::register))
            .route("/heartbeat", post(discover_handlers::heartbeat))
            .route("/fetch", post(discover_handlers::fetch))
            .with_state(RoleState {
                ctx: ctx.clone(),
                role,
            })
    };

    let api_routes = Router::new()
        .nest("/discover/server", role_routes(Role::Server))
        .nest("/discover/client", role_routes(Role::Client));

    Router::new().nest("/api/v1", api_routes)
}

/// Router served by a config server.
pub fn server_router(ctx: ServerContext) -> Router {
    use config_handlers as h;

    let api_routes = Router::new()
        .route("/client/config/watch", post(h::watch))
        .route("/client/config/list", post(h::pull))
        .route("/client/exit", post(h::exit))
        .route("/config/detail", post(h::item_detail))
        .route("/config/list", post(h::list_items))
        .route("/config/create", post(h::create_item))
        .route("/config/update", post(h::update_item))
        .route("/config/delete", post(h::delete_item))
        .route("/config/history", post(h::history))
        .route("/config/release", post(h::release))
        .route("/config/release/history", post(h::release_history))
        .route("/config/rollback", post(h::rollback))
        .route("/config/sync", post(h::sync))
        .route("/instance/list", post(h::list_instances))
        .route("/app/create", post(h::create_app))
        .route("/app/detail", post(h::app_detail))
        .route("/cluster/create", post(h::create_cluster))
        .route("/namespace/create", post(h::create_namespace))
        .with_state(ctx);

    Router::new().nest("/api/v1", api_routes)
}
