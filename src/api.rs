use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::aggregate::{daily_averages, AggregateError, DailyAggregate};
use crate::batch::BatchUpdater;
use crate::heartbeat::{CycleOutcome, Heartbeat};
use crate::history::CycleSummary;
use crate::station::{BatchUpdateItem, StationRegistry, StationSnapshot};
use crate::table::{parse_table, Layout};
use crate::transport::{FileTransport, TransportError};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn StationRegistry>,
    pub transport: Arc<dyn FileTransport>,
    pub batch: BatchUpdater,
    pub heartbeat: Arc<Heartbeat>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/stations", get(list_stations))
        .route("/stations/batch-update", post(batch_update))
        .route("/stations/{id}/history", get(station_history))
        .route("/debug/heartbeat", get(debug_heartbeat))
        .route("/debug/heartbeat/run", post(run_heartbeat))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Current fleet view for the map. Served from the in-process view once the
/// first cycle has loaded it; falls back to the registry on a fresh boot.
async fn list_stations(
    State(state): State<AppState>,
) -> Result<Json<Vec<StationSnapshot>>, (StatusCode, String)> {
    let view = state.heartbeat.stations_view();
    if !view.is_empty() {
        return Ok(Json(view));
    }
    state
        .registry
        .list_stations()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))
}

#[derive(serde::Serialize)]
struct BatchUpdateResp {
    applied: usize,
}

/// The only externally callable entry point into the batch updater; used by
/// maintenance tooling alongside the scheduler's own submissions.
async fn batch_update(
    State(state): State<AppState>,
    Json(items): Json<Vec<BatchUpdateItem>>,
) -> Result<Json<BatchUpdateResp>, (StatusCode, String)> {
    match state.batch.apply(&items).await {
        Ok(applied) => Ok(Json(BatchUpdateResp { applied })),
        Err(e) => Err((StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

/// Daily aggregates computed on demand from the station's long-horizon
/// history file.
async fn station_history(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Vec<DailyAggregate>>, (StatusCode, String)> {
    let stations = state
        .registry
        .list_stations()
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
    let station = stations
        .iter()
        .find(|s| s.id == id)
        .ok_or((StatusCode::NOT_FOUND, format!("unknown station {id}")))?;
    let path = station.history_file_path.as_deref().ok_or((
        StatusCode::NOT_FOUND,
        format!("station {id} has no history file"),
    ))?;

    let content = state.transport.fetch_raw(path).await.map_err(|e| match e {
        TransportError::NotFound(p) => (StatusCode::NOT_FOUND, format!("remote file missing: {p}")),
        other => (StatusCode::BAD_GATEWAY, other.to_string()),
    })?;

    let table = parse_table(&content, Layout::Banked)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    let days = daily_averages(&table).map_err(|e: AggregateError| {
        (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
    })?;
    Ok(Json(days))
}

#[derive(serde::Serialize)]
struct HeartbeatInfo {
    state: &'static str,
    recent_cycles: Vec<CycleSummary>,
}

async fn debug_heartbeat(State(state): State<AppState>) -> Json<HeartbeatInfo> {
    Json(HeartbeatInfo {
        state: if state.heartbeat.is_running() {
            "running"
        } else {
            "idle"
        },
        recent_cycles: state.heartbeat.recent_cycles(10),
    })
}

#[derive(serde::Serialize)]
struct RunResp {
    outcome: &'static str,
    processed: usize,
    failed: usize,
    applied: usize,
}

/// Request one immediate cycle. Subject to the same re-entrancy guard as the
/// scheduler: if a cycle is already in flight this is a no-op.
async fn run_heartbeat(State(state): State<AppState>) -> Json<RunResp> {
    match state.heartbeat.run_cycle().await {
        CycleOutcome::Completed {
            processed,
            failed,
            applied,
        } => Json(RunResp {
            outcome: "completed",
            processed,
            failed,
            applied,
        }),
        CycleOutcome::Skipped => Json(RunResp {
            outcome: "already-running",
            processed: 0,
            failed: 0,
            applied: 0,
        }),
    }
}
