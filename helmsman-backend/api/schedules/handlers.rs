use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::AppState;
use crate::api::error::{ApiResult, api_error, bad_request};
use crate::schedule::cron;
use crate::store::schedules::{NewSchedule, RestartStrategy, TargetType};

pub(crate) async fn list_schedules(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let schedules = state.store.list_schedules().await.map_err(api_error)?;
    let out: Vec<Value> = schedules
        .iter()
        .map(|s| {
            let mut v = serde_json::to_value(s).unwrap_or_default();
            v["description"] = json!(cron::describe_cron(&s.cron_expression));
            v
        })
        .collect();
    Ok(Json(json!({ "schedules": out })))
}

pub(crate) async fn create_schedule(
    State(state): State<AppState>,
    Json(body): Json<NewSchedule>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if body.name.trim().is_empty() {
        return Err(bad_request("schedule name is required"));
    }
    if !cron::validate_cron(&body.cron_expression) {
        return Err(bad_request(format!(
            "invalid cron expression: {}",
            body.cron_expression
        )));
    }
    let next_run = cron::calculate_next_run(&body.cron_expression, Utc::now());
    let schedule = state
        .store
        .create_schedule(body, next_run)
        .await
        .map_err(api_error)?;
    tracing::info!(schedule = %schedule.name, id = schedule.id, "schedule created");
    Ok((StatusCode::CREATED, Json(json!({ "schedule": schedule }))))
}

pub(crate) async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let schedule = state.store.get_schedule(id).await.map_err(api_error)?;
    let mut v = serde_json::to_value(&schedule).unwrap_or_default();
    v["description"] = json!(cron::describe_cron(&schedule.cron_expression));
    Ok(Json(json!({ "schedule": v })))
}

#[derive(Deserialize)]
pub(crate) struct UpdateScheduleRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cron_expression: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    target_type: Option<TargetType>,
    #[serde(default)]
    target_nodes: Option<Vec<String>>,
    #[serde(default)]
    restart_after_sync: Option<bool>,
    #[serde(default)]
    restart_strategy: Option<RestartStrategy>,
}

pub(crate) async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateScheduleRequest>,
) -> ApiResult<Json<Value>> {
    let mut schedule = state.store.get_schedule(id).await.map_err(api_error)?;

    if let Some(name) = body.name {
        schedule.name = name;
    }
    if let Some(expr) = body.cron_expression {
        if !cron::validate_cron(&expr) {
            return Err(bad_request(format!("invalid cron expression: {expr}")));
        }
        schedule.cron_expression = expr;
    }
    if let Some(enabled) = body.enabled {
        schedule.enabled = enabled;
    }
    if let Some(target_type) = body.target_type {
        schedule.target_type = target_type;
    }
    if let Some(target_nodes) = body.target_nodes {
        schedule.target_nodes = target_nodes;
    }
    if let Some(restart_after_sync) = body.restart_after_sync {
        schedule.restart_after_sync = restart_after_sync;
    }
    if let Some(restart_strategy) = body.restart_strategy {
        schedule.restart_strategy = restart_strategy;
    }

    // Any edit recomputes the horizon; a stale next_run from an old cron
    // must not linger.
    let next_run = cron::calculate_next_run(&schedule.cron_expression, Utc::now());
    state
        .store
        .update_schedule(&schedule, next_run)
        .await
        .map_err(api_error)?;
    let schedule = state.store.get_schedule(id).await.map_err(api_error)?;
    Ok(Json(json!({ "schedule": schedule })))
}

pub(crate) async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    state.store.delete_schedule(id).await.map_err(api_error)?;
    Ok(Json(json!({ "deleted": id })))
}

/// GET /scheduler/status — executor liveness plus schedule counts.
pub(crate) async fn scheduler_status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let schedules = state.store.list_schedules().await.map_err(api_error)?;
    Ok(Json(json!({
        "running": state.executor.is_running(),
        "schedule_count": schedules.len(),
        "enabled_count": schedules.iter().filter(|s| s.enabled).count(),
    })))
}

#[derive(Deserialize)]
pub(crate) struct ValidateCronRequest {
    cron: String,
}

/// POST /schedules/validate — validity, description, and the next 5 runs.
pub(crate) async fn validate_cron(
    Json(body): Json<ValidateCronRequest>,
) -> Json<Value> {
    let expr = body.cron.trim();
    if !cron::validate_cron(expr) {
        return Json(json!({
            "valid": false,
            "description": null,
            "next_5_runs": [],
        }));
    }

    let runs: Vec<String> = cron::next_runs(expr, Utc::now(), 5)
        .into_iter()
        .map(|t| t.to_rfc3339())
        .collect();
    Json(json!({
        "valid": true,
        "description": cron::describe_cron(expr),
        "next_5_runs": runs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn validate(expr: &str) -> Value {
        let Json(body) = validate_cron(Json(ValidateCronRequest {
            cron: expr.to_string(),
        }))
        .await;
        body
    }

    #[tokio::test]
    async fn validate_accepts_and_describes() {
        let body = validate("0 2 * * *").await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["description"], "Every day at 2:00 AM");
        assert_eq!(body["next_5_runs"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn validate_rejects_garbage() {
        let body = validate("61 * * * *").await;
        assert_eq!(body["valid"], false);
        assert!(body["next_5_runs"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn validate_trims_whitespace() {
        let body = validate("  */5 * * * *  ").await;
        assert_eq!(body["valid"], true);
    }
}
