use axum::Json;
use axum::extract::{Path, Query, State};
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::AppState;
use crate::api::error::{ApiResult, api_error, bad_request, vault_disabled};
use crate::store::credentials::CredentialKind;
use crate::store::nodes::{AssignmentType, CodeStatus, NewNode, Node, NodeRole};

fn node_json(node: &Node, roles: &[NodeRole]) -> Value {
    json!({
        "node_id": node.node_id,
        "ip_address": node.ip_address,
        "hostname": node.hostname,
        "ssh_user": node.ssh_user,
        "ssh_port": node.ssh_port,
        "code_status": node.code_status,
        "current_code_version": node.current_code_version,
        "extra_data": node.extra_data,
        "roles": roles,
        "created_at": node.created_at.to_rfc3339(),
        "updated_at": node.updated_at.to_rfc3339(),
    })
}

pub(crate) async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let nodes = state.store.list_nodes().await.map_err(api_error)?;
    let mut out = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let roles = state
            .store
            .list_node_roles(&node.node_id)
            .await
            .map_err(api_error)?;
        out.push(node_json(node, &roles));
    }
    Ok(Json(json!({ "nodes": out })))
}

pub(crate) async fn register_node(
    State(state): State<AppState>,
    Json(body): Json<NewNode>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if body.node_id.trim().is_empty() || body.ip_address.trim().is_empty() {
        return Err(bad_request("node_id and ip_address are required"));
    }
    let node = state.store.register_node(body).await.map_err(api_error)?;
    tracing::info!(node_id = %node.node_id, "node registered");
    Ok((StatusCode::CREATED, Json(node_json(&node, &[]))))
}

pub(crate) async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let (node, roles) = state.registry.node_with_roles(&id).await.map_err(api_error)?;
    Ok(Json(node_json(&node, &roles)))
}

pub(crate) async fn deregister_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.store.delete_node(&id).await.map_err(api_error)?;
    tracing::info!(node_id = %id, "node deregistered");
    Ok(Json(json!({ "deleted": id })))
}

#[derive(Deserialize)]
pub(crate) struct CodeStatusRequest {
    status: String,
}

/// Drift-detector hook: flips nodes into OUTDATED (or any other status).
pub(crate) async fn set_code_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CodeStatusRequest>,
) -> ApiResult<Json<Value>> {
    let status = CodeStatus::parse(&body.status)
        .ok_or_else(|| bad_request(format!("unknown code status: {}", body.status)))?;
    state
        .registry
        .set_code_status(&id, status)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "node_id": id, "code_status": status })))
}

pub(crate) async fn assign_role(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let assignment = state
        .registry
        .assign_role(&id, &name, AssignmentType::Manual)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "assignment": assignment }))))
}

pub(crate) async fn unassign_role(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    state
        .registry
        .unassign_role(&id, &name)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "unassigned": name, "node_id": id })))
}

#[derive(Deserialize)]
pub(crate) struct CredentialListQuery {
    kind: Option<String>,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

pub(crate) async fn list_node_credentials(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CredentialListQuery>,
) -> ApiResult<Json<Value>> {
    let vault = state.vault.as_ref().ok_or_else(vault_disabled)?;
    let kind = match query.kind.as_deref() {
        None => None,
        Some(raw) => Some(
            CredentialKind::parse(raw)
                .ok_or_else(|| bad_request(format!("unknown credential kind: {raw}")))?,
        ),
    };
    let credentials = vault
        .list_by_node(&id, kind, query.active)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "credentials": credentials })))
}
