//! Role catalog CRUD.

use axum::Json;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::Router;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use super::error::{ApiResult, api_error, bad_request};
use crate::store::roles::NewRole;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route(
            "/roles/{name}",
            get(get_role).put(update_role).delete(delete_role),
        )
}

async fn list_roles(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let roles = state.store.list_roles().await.map_err(api_error)?;
    Ok(Json(json!({ "roles": roles })))
}

async fn create_role(
    State(state): State<AppState>,
    Json(body): Json<NewRole>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !body.target_path.starts_with('/') {
        return Err(bad_request("target_path must be absolute"));
    }
    let role = state.store.create_role(body).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "role": role }))))
}

async fn get_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let role = state.store.get_role(&name).await.map_err(api_error)?;
    Ok(Json(json!({ "role": role })))
}

#[derive(Deserialize)]
struct UpdateRoleRequest {
    #[serde(default)]
    source_paths: Option<Vec<String>>,
    #[serde(default)]
    target_path: Option<String>,
    #[serde(default)]
    post_sync_cmd: Option<Option<String>>,
    #[serde(default)]
    auto_restart: Option<bool>,
    #[serde(default)]
    systemd_service: Option<Option<String>>,
}

async fn update_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<UpdateRoleRequest>,
) -> ApiResult<Json<Value>> {
    let mut role = state.store.get_role(&name).await.map_err(api_error)?;
    if let Some(source_paths) = body.source_paths {
        role.source_paths = source_paths;
    }
    if let Some(target_path) = body.target_path {
        if !target_path.starts_with('/') {
            return Err(bad_request("target_path must be absolute"));
        }
        role.target_path = target_path;
    }
    if let Some(post_sync_cmd) = body.post_sync_cmd {
        role.post_sync_cmd = post_sync_cmd;
    }
    if let Some(auto_restart) = body.auto_restart {
        role.auto_restart = auto_restart;
    }
    if let Some(systemd_service) = body.systemd_service {
        role.systemd_service = systemd_service;
    }
    state.store.update_role(&role).await.map_err(api_error)?;
    Ok(Json(json!({ "role": role })))
}

async fn delete_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    state.store.delete_role(&name).await.map_err(api_error)?;
    Ok(Json(json!({ "deleted": name })))
}
