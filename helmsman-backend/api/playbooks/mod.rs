pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/playbooks/runs", get(handlers::list_runs))
        .route("/playbooks/runs/{run_id}", get(handlers::get_run))
        .route("/playbooks/runs/{run_id}/events", get(handlers::run_events))
        .route(
            "/playbooks/runs/{run_id}/events/sse",
            get(handlers::run_events_sse),
        )
        .route("/playbooks/{name}/run", post(handlers::start_run))
}
