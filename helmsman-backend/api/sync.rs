//! Manual sync entry point.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::post;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use super::error::{ApiResult, api_error, bad_request};
use crate::cache::LATEST;

pub fn router() -> Router<AppState> {
    Router::new().route("/sync/run", post(run_sync))
}

#[derive(Deserialize)]
struct RunSyncRequest {
    #[serde(default)]
    schedule_id: Option<i64>,
    #[serde(default)]
    node_ids: Vec<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    commit: Option<String>,
    #[serde(default = "default_restart")]
    restart: bool,
}

fn default_restart() -> bool {
    true
}

/// Fan a sync out by hand: either replay a stored schedule, or hit an
/// explicit list of nodes (optionally restricted to one role). Responds
/// 202 with per-node results.
async fn run_sync(
    State(state): State<AppState>,
    Json(body): Json<RunSyncRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if let Some(schedule_id) = body.schedule_id {
        let schedule = state
            .store
            .get_schedule(schedule_id)
            .await
            .map_err(api_error)?;
        let (success, message) = state
            .orchestrator
            .execute_schedule(&schedule)
            .await
            .map_err(api_error)?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "success": success, "message": message })),
        ));
    }

    if body.node_ids.is_empty() {
        return Err(bad_request("schedule_id or node_ids is required"));
    }

    // One snapshot for the whole request.
    let commit = match body.commit {
        Some(commit) => commit,
        None => state
            .store
            .active_code_source()
            .await
            .map_err(api_error)?
            .and_then(|s| s.last_known_commit)
            .unwrap_or_else(|| LATEST.to_string()),
    };
    state.cache.ensure(&commit).await.map_err(api_error)?;

    // One entry per node; a node succeeds iff every one of its role syncs
    // succeeded.
    let mut results = Vec::new();
    for node_id in &body.node_ids {
        let roles = match &body.role {
            Some(role) => vec![role.clone()],
            None => state
                .store
                .list_node_roles(node_id)
                .await
                .map_err(api_error)?
                .into_iter()
                .map(|nr| nr.role_name)
                .collect(),
        };

        if roles.is_empty() {
            results.push(json!({
                "node_id": node_id,
                "success": false,
                "message": "node has no role assignments",
                "roles": [],
            }));
            continue;
        }

        let mut role_results = Vec::new();
        let mut node_success = true;
        for role in roles {
            let outcome = state
                .orchestrator
                .sync_node_role(node_id, &role, &commit, body.restart)
                .await;
            match outcome {
                Ok(message) => role_results.push(json!({
                    "role": role,
                    "success": true,
                    "message": message,
                })),
                Err(e) => {
                    node_success = false;
                    role_results.push(json!({
                        "role": role,
                        "success": false,
                        "message": e.to_string(),
                    }));
                }
            }
        }

        results.push(json!({
            "node_id": node_id,
            "success": node_success,
            "roles": role_results,
        }));
    }

    let success = results
        .iter()
        .any(|r| r["success"].as_bool().unwrap_or(false));
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": success,
            "commit": commit,
            "results": results,
        })),
    ))
}
