pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/nodes", get(handlers::list_nodes).post(handlers::register_node))
        .route(
            "/nodes/{id}",
            get(handlers::get_node).delete(handlers::deregister_node),
        )
        .route("/nodes/{id}/code-status", post(handlers::set_code_status))
        .route(
            "/nodes/{id}/role/{name}",
            post(handlers::assign_role).delete(handlers::unassign_role),
        )
        .route("/nodes/{id}/credentials", get(handlers::list_node_credentials))
}
