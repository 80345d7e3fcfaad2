use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{
        sse::{Event, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use twin_core::{CommandError, TelemetryValue, WriteError};

type ApiResult = (StatusCode, Json<serde_json::Value>);

pub fn make_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/meta", get(meta_handler))
        .route("/api/v1/lines", get(lines_handler))
        .route(
            "/api/v1/telemetry/:id/:tag",
            get(read_handler).post(write_handler),
        )
        .route("/api/v1/lines/:line/command", post(command_handler))
        .route("/api/v1/stream", get(stream_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn command_status(err: &CommandError) -> StatusCode {
    match err {
        CommandError::Unknown(_) | CommandError::Malformed { .. } => StatusCode::BAD_REQUEST,
        CommandError::UnknownStation(_) => StatusCode::NOT_FOUND,
        CommandError::Busy { .. }
        | CommandError::NothingPending(_)
        | CommandError::InvalidPhase { .. } => StatusCode::CONFLICT,
    }
}

fn write_status(err: &WriteError) -> StatusCode {
    match err {
        WriteError::UnknownTarget(_) => StatusCode::NOT_FOUND,
        WriteError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
        WriteError::Command(cmd) => command_status(cmd),
    }
}

fn error_body(status: StatusCode, message: impl std::fmt::Display) -> ApiResult {
    (status, Json(serde_json::json!({ "error": message.to_string() })))
}

pub async fn meta_handler(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let ticks: serde_json::Map<String, serde_json::Value> = app_state
        .lines
        .iter()
        .map(|shared| {
            let runtime = shared.lock();
            (runtime.line.id().0.clone(), runtime.line.current_tick().into())
        })
        .collect();
    Json(serde_json::json!({
        "content_version": app_state.content_version,
        "seed": app_state.seed,
        "tick_interval_ms": app_state.tick_interval_ms,
        "uptime_ms": app_state.clock.now_ms(),
        "ticks": ticks,
        "mes": app_state.mes.is_some(),
    }))
}

pub async fn lines_handler(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let lines: Vec<serde_json::Value> = app_state
        .lines
        .iter()
        .map(|shared| {
            let runtime = shared.lock();
            let line = &runtime.line;
            let stations: Vec<serde_json::Value> = line
                .stations()
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "name": s.id(),
                        "unit_type": s.profile().unit_type,
                        "phase": s.phase(),
                        "produced": s.produced(),
                        "awaiting_ack": s.awaiting_ack(),
                        "oee": s.oee(),
                    })
                })
                .collect();
            serde_json::json!({
                "line_id": line.id(),
                "order": line.order(),
                "ack_pending": line.ack_pending(),
                "stations": stations,
                "metrics": twin_core::compute_metrics(line),
            })
        })
        .collect();
    Json(serde_json::Value::Array(lines))
}

pub async fn read_handler(
    State(app_state): State<AppState>,
    Path((id, tag)): Path<(String, String)>,
) -> ApiResult {
    let Some(shared) = app_state.line_owning(&id) else {
        return error_body(StatusCode::NOT_FOUND, format!("unknown target '{id}'"));
    };
    let runtime = shared.lock();
    match runtime.line.read(&id, &tag) {
        Some(value) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": id, "tag": tag, "value": value })),
        ),
        None => error_body(StatusCode::NOT_FOUND, format!("no tag '{tag}' on '{id}'")),
    }
}

/// Same dispatch as a field-protocol write: `command` runs the grammar for
/// the target, anything else overwrites the published value.
pub async fn write_handler(
    State(app_state): State<AppState>,
    Path((id, tag)): Path<(String, String)>,
    Json(value): Json<TelemetryValue>,
) -> ApiResult {
    let Some(shared) = app_state.line_owning(&id) else {
        return error_body(StatusCode::NOT_FOUND, format!("unknown target '{id}'"));
    };
    let now_ms = app_state.clock.now_ms();
    let (result, message) = {
        let mut runtime = shared.lock();
        let result = runtime.line.write(&id, &tag, value, now_ms);
        let events = result.as_ref().cloned().unwrap_or_default();
        (result.map(|e| e.len()), runtime.drain(events))
    };
    app_state.publish(message);
    match result {
        Ok(events) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": id, "tag": tag, "event_count": events })),
        ),
        Err(err) => error_body(write_status(&err), err),
    }
}

#[derive(Deserialize)]
pub struct CommandBody {
    pub command: String,
}

pub async fn command_handler(
    State(app_state): State<AppState>,
    Path(line_id): Path<String>,
    Json(body): Json<CommandBody>,
) -> ApiResult {
    let Some(shared) = app_state
        .lines
        .iter()
        .find(|shared| shared.lock().line.id().0 == line_id)
    else {
        return error_body(StatusCode::NOT_FOUND, format!("unknown line '{line_id}'"));
    };
    let now_ms = app_state.clock.now_ms();
    let (result, message, order) = {
        let mut runtime = shared.lock();
        let result = runtime.line.handle_command(&body.command, now_ms);
        let events = result.as_ref().cloned().unwrap_or_default();
        let order = serde_json::to_value(runtime.line.order()).unwrap_or_default();
        (result.map(|e| e.len()), runtime.drain(events), order)
    };
    app_state.publish(message);
    match result {
        Ok(events) => (
            StatusCode::OK,
            Json(serde_json::json!({ "line_id": line_id, "event_count": events, "order": order })),
        ),
        Err(err) => error_body(command_status(&err), err),
    }
}

pub async fn stream_handler(
    State(app_state): State<AppState>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = app_state.stream_tx.subscribe();
    let clock = app_state.clock;

    let stream = async_stream::stream! {
        let mut heartbeat = tokio::time::interval(Duration::from_secs(5));
        heartbeat.tick().await; // discard the immediate first tick
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(message) => {
                            let data = serde_json::to_string(&message).unwrap_or_default();
                            yield Ok(Event::default().event("line").data(data));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "stream subscriber lagging");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = heartbeat.tick() => {
                    let hb = serde_json::json!({"heartbeat": true, "uptime_ms": clock.now_ms()});
                    yield Ok(Event::default().event("heartbeat").data(hb.to_string()));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}
