//! Active code-source designation.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use super::error::{ApiResult, api_error};

pub fn router() -> Router<AppState> {
    Router::new().route("/code-source", get(get_code_source).put(set_code_source))
}

async fn get_code_source(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let source = state.store.active_code_source().await.map_err(api_error)?;
    Ok(Json(json!({ "code_source": source })))
}

#[derive(Deserialize)]
struct SetCodeSourceRequest {
    node_id: String,
    repo_path: String,
    #[serde(default)]
    last_known_commit: Option<String>,
}

/// Switching the source deactivates the previous record in the same
/// transaction, so there is never more than one active row.
async fn set_code_source(
    State(state): State<AppState>,
    Json(body): Json<SetCodeSourceRequest>,
) -> ApiResult<Json<Value>> {
    let source = state
        .store
        .set_active_code_source(
            &body.node_id,
            &body.repo_path,
            body.last_known_commit.as_deref(),
        )
        .await
        .map_err(api_error)?;
    tracing::info!(node_id = %source.node_id, repo = %source.repo_path, "code source switched");
    Ok(Json(json!({ "code_source": source })))
}
