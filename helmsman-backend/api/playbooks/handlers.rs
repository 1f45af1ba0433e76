use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use hyper::StatusCode;
use std::convert::Infallible;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult, api_error, bad_request};
use crate::broadcast::ChannelSink;
use crate::error::ControlError;
use crate::playbook::ProgressFn;
use crate::playbook::progress::ProgressEvent;
use crate::store::playbook_runs::{PlaybookRun, PlaybookRunState};

#[derive(Deserialize)]
pub(crate) struct StartRunRequest {
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    extra_vars: BTreeMap<String, String>,
    #[serde(default)]
    check_mode: bool,
}

/// POST /playbooks/{name}/run — 202 with the run id; the playbook runs on
/// its own task and streams progress through the broadcaster.
pub(crate) async fn start_run(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<StartRunRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if name.trim().is_empty() || name.contains("..") || name.starts_with('/') {
        return Err(bad_request(format!("invalid playbook name: {name}")));
    }

    let run = PlaybookRun {
        run_id: Uuid::new_v4().to_string(),
        playbook_name: name.clone(),
        targets: body.targets.clone(),
        tags: body.tags.clone(),
        extra_vars: body.extra_vars.clone(),
        check_mode: body.check_mode,
        state: PlaybookRunState::Queued,
        return_code: None,
        output: String::new(),
        events: vec![],
        started_at: None,
        finished_at: None,
    };
    state.store.insert_playbook_run(&run).await.map_err(api_error)?;

    let run_id = run.run_id.clone();
    tokio::spawn(supervise_run(state.clone(), run, body));
    tracing::info!(playbook = %name, run_id = %run_id, "playbook run queued");

    Ok((StatusCode::ACCEPTED, Json(json!({ "run_id": run_id }))))
}

/// Drive one playbook run to completion, mirroring every progress event
/// into the run row and the broadcaster. Never propagates an error — a
/// failed run is a FAILED row, not a dead task.
async fn supervise_run(state: AppState, run: PlaybookRun, request: StartRunRequest) {
    let run_id = run.run_id.clone();
    if let Err(e) = state.store.mark_run_started(&run_id).await {
        tracing::error!(run_id = %run_id, error = %e, "failed to mark run started");
    }

    // The runner's callback is synchronous; bridge it into async land
    // through a channel drained by a consumer task.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
    let progress: ProgressFn = Box::new(move |event| {
        tx.send(event)
            .map_err(|_| ControlError::Internal("progress consumer gone".into()))
    });

    let consumer = {
        let state = state.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move {
            let mut events: Vec<ProgressEvent> = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event.clone());
                if let Err(e) = state.store.update_run_events(&run_id, &events).await {
                    tracing::warn!(run_id = %run_id, error = %e, "failed to persist run events");
                }
                state.broadcaster.broadcast(&run_id, &event).await;
            }
            events
        })
    };

    let limit = (!request.targets.is_empty()).then_some(request.targets.as_slice());
    let tags = (!request.tags.is_empty()).then_some(request.tags.as_slice());
    let extra_vars = (!request.extra_vars.is_empty()).then_some(&request.extra_vars);

    let outcome = state
        .playbooks
        .execute_playbook(
            &run.playbook_name,
            limit,
            tags,
            extra_vars,
            request.check_mode,
            Some(progress),
        )
        .await;

    // The progress closure (and with it the sender) died with the runner
    // call, so the consumer drains and finishes.
    let events = consumer.await.unwrap_or_default();

    let final_state = if outcome.success {
        PlaybookRunState::Succeeded
    } else {
        PlaybookRunState::Failed
    };
    if let Err(e) = state
        .store
        .finish_run(
            &run_id,
            final_state,
            Some(outcome.return_code),
            &outcome.output,
            &events,
        )
        .await
    {
        tracing::error!(run_id = %run_id, error = %e, "failed to record run outcome");
    }
    tracing::info!(
        run_id = %run_id,
        state = final_state.as_str(),
        return_code = outcome.return_code,
        "playbook run finished"
    );
}

#[derive(Deserialize)]
pub(crate) struct ListRunsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

pub(crate) async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<Json<Value>> {
    let runs = state
        .store
        .list_playbook_runs(query.limit)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "runs": runs })))
}

pub(crate) async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run = state
        .store
        .get_playbook_run(&run_id)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "run": run })))
}

/// GET /playbooks/runs/{run_id}/events — WebSocket stream of progress
/// events for a run. No replay; subscribers see what happens after they
/// attach.
pub(crate) async fn run_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // 404 before the upgrade for unknown runs.
    state
        .store
        .get_playbook_run(&run_id)
        .await
        .map_err(api_error)?;
    Ok(ws.on_upgrade(move |socket| stream_events(socket, run_id, state)))
}

async fn stream_events(mut socket: WebSocket, run_id: String, state: AppState) {
    let (sink, mut rx) = ChannelSink::new();
    let subscriber_id = state.broadcaster.attach(&run_id, Arc::new(sink)).await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let payload = serde_json::to_string(&event).unwrap_or_default();
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                // Client closed (or errored); stop streaming.
                match incoming {
                    None | Some(Err(_)) => break,
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.broadcaster.detach(&run_id, subscriber_id).await;
    tracing::debug!(run_id = %run_id, "event stream closed");
}

/// GET /playbooks/runs/{run_id}/events/sse — the same stream for clients
/// that cannot speak WebSocket. Cleanup is implicit: once the client goes
/// away the receiver drops, the next send fails, and the broadcaster
/// prunes the subscriber.
pub(crate) async fn run_events_sse(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state
        .store
        .get_playbook_run(&run_id)
        .await
        .map_err(api_error)?;

    let (sink, mut rx) = ChannelSink::new();
    state.broadcaster.attach(&run_id, Arc::new(sink)).await;

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let payload = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(event.stage).data(payload));
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
