use axum::Json;
use axum::extract::{Path, Query, State};
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::AppState;
use crate::api::error::{ApiResult, api_error, bad_request, vault_disabled};
use crate::store::credentials::CredentialKind;
use crate::vault::{CreateCredential, UpdateCredential};

#[derive(Deserialize)]
pub(crate) struct CreateCredentialRequest {
    node_id: String,
    name: String,
    /// Kind-specific plaintext fields. This body is the only inbound path
    /// for plaintext.
    secret: serde_json::Value,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    display_number: Option<i64>,
    #[serde(default)]
    vnc_port: Option<u16>,
    #[serde(default)]
    websockify_enabled: Option<bool>,
}

/// POST /credentials/{kind}
pub(crate) async fn create_credential(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(body): Json<CreateCredentialRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let vault = state.vault.as_ref().ok_or_else(vault_disabled)?;
    let kind = CredentialKind::parse(&kind)
        .ok_or_else(|| bad_request(format!("unknown credential kind: {kind}")))?;

    let created = vault
        .create(CreateCredential {
            node_id: body.node_id,
            kind,
            name: body.name,
            secret: body.secret,
            port: body.port,
            display_number: body.display_number,
            vnc_port: body.vnc_port,
            websockify_enabled: body.websockify_enabled,
        })
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "credential": created }))))
}

pub(crate) async fn get_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let vault = state.vault.as_ref().ok_or_else(vault_disabled)?;
    let credential = vault.get_public(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "credential": credential })))
}

#[derive(Deserialize)]
pub(crate) struct UpdateCredentialRequest {
    #[serde(default)]
    secret: Option<serde_json::Value>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    display_number: Option<i64>,
    #[serde(default)]
    vnc_port: Option<u16>,
    #[serde(default)]
    websockify_enabled: Option<bool>,
    #[serde(default)]
    is_active: Option<bool>,
}

pub(crate) async fn update_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateCredentialRequest>,
) -> ApiResult<Json<Value>> {
    let vault = state.vault.as_ref().ok_or_else(vault_disabled)?;
    let updated = vault
        .update(
            &id,
            UpdateCredential {
                secret: body.secret,
                port: body.port,
                display_number: body.display_number,
                vnc_port: body.vnc_port,
                websockify_enabled: body.websockify_enabled,
                is_active: body.is_active,
            },
        )
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "credential": updated })))
}

pub(crate) async fn delete_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let vault = state.vault.as_ref().ok_or_else(vault_disabled)?;
    vault.delete(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "deleted": id })))
}

#[derive(Deserialize)]
pub(crate) struct ConnectionQuery {
    #[serde(default)]
    token: bool,
}

/// GET /credentials/{id}/connection?token=true — public fields plus an
/// optional single-use token.
pub(crate) async fn connection_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ConnectionQuery>,
) -> ApiResult<Json<Value>> {
    let vault = state.vault.as_ref().ok_or_else(vault_disabled)?;
    let info = vault
        .connection_info(&id, query.token)
        .await
        .map_err(api_error)?;
    Ok(Json(serde_json::to_value(&info).unwrap_or_default()))
}

#[derive(Deserialize)]
pub(crate) struct ExchangeRequest {
    token: String,
}

/// POST /credentials/exchange — the only endpoint that returns plaintext.
pub(crate) async fn exchange_token(
    State(state): State<AppState>,
    Json(body): Json<ExchangeRequest>,
) -> ApiResult<Json<Value>> {
    let vault = state.vault.as_ref().ok_or_else(vault_disabled)?;
    let secret = vault.exchange_token(&body.token).await.map_err(api_error)?;
    Ok(Json(json!({ "secret": secret })))
}

#[derive(Deserialize)]
pub(crate) struct EndpointsQuery {
    kind: String,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

pub(crate) async fn list_endpoints(
    State(state): State<AppState>,
    Query(query): Query<EndpointsQuery>,
) -> ApiResult<Json<Value>> {
    let vault = state.vault.as_ref().ok_or_else(vault_disabled)?;
    let kind = CredentialKind::parse(&query.kind)
        .ok_or_else(|| bad_request(format!("unknown credential kind: {}", query.kind)))?;
    let endpoints = vault
        .list_fleet_endpoints(kind, query.active)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "endpoints": endpoints })))
}

#[derive(Deserialize)]
pub(crate) struct ExpiringQuery {
    #[serde(default = "default_days")]
    days: i64,
}

fn default_days() -> i64 {
    30
}

pub(crate) async fn list_expiring_tls(
    State(state): State<AppState>,
    Query(query): Query<ExpiringQuery>,
) -> ApiResult<Json<Value>> {
    let vault = state.vault.as_ref().ok_or_else(vault_disabled)?;
    if query.days < 0 {
        return Err(bad_request("days must be non-negative"));
    }
    let expiring = vault.list_expiring_tls(query.days).await.map_err(api_error)?;
    Ok(Json(json!({ "expiring": expiring, "days": query.days })))
}
