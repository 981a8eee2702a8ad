// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /stations/batch-update (the trigger surface)
// - GET /stations
// - GET /stations/{id}/history
// - GET /debug/heartbeat

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use soilwatch::api::{self, AppState};
use soilwatch::batch::BatchUpdater;
use soilwatch::heartbeat::{Heartbeat, HeartbeatCfg};
use soilwatch::station::{
    MemoryRegistry, StationRegistry, StationSnapshot, StationThresholds,
};
use soilwatch::transport::{FileTransport, TransportError};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

const HISTORY_FILE: &str = "\"TOA5\",\"Station01\"\n\
                            \"TIMESTAMP\",\"WC1_Avg\",\"WC2_Avg\",\"WC3_Avg\",\"WC4_Avg\"\n\
                            \"TS\",\"%\",\"%\",\"%\",\"%\"\n\
                            \"\",\"Avg\",\"Avg\",\"Avg\",\"Avg\"\n\
                            2023-01-01 10:00:00,10,20,30,40\n\
                            2023-01-01 11:00:00,12,22,32,42\n";

struct FixtureTransport;

#[async_trait]
impl FileTransport for FixtureTransport {
    async fn fetch_raw(&self, remote_path: &str) -> Result<String, TransportError> {
        if remote_path == "station01/history.dat" {
            Ok(HISTORY_FILE.to_string())
        } else {
            Err(TransportError::NotFound(remote_path.to_string()))
        }
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

fn stations() -> Vec<StationSnapshot> {
    vec![
        StationSnapshot {
            id: 1,
            name: "Upper slope ridge".to_string(),
            ftp_file_path: Some("station01/current.dat".to_string()),
            history_file_path: Some("station01/history.dat".to_string()),
            thresholds: StationThresholds {
                wc1_max: Some(45.0),
                wc2_max: Some(44.5),
                wc3_max: Some(47.2),
                wc4_max: Some(46.0),
            },
            soil_saturation: None,
            precipitation: None,
            last_updated: None,
            is_available: true,
        },
        StationSnapshot {
            id: 2,
            name: "Toe of slope".to_string(),
            ftp_file_path: None,
            history_file_path: None,
            thresholds: StationThresholds::default(),
            soil_saturation: None,
            precipitation: None,
            last_updated: None,
            is_available: true,
        },
    ]
}

/// Build the same Router the binary uses.
fn test_router() -> (Router, Arc<MemoryRegistry>) {
    let registry = Arc::new(MemoryRegistry::new(stations()));
    let transport: Arc<dyn FileTransport> = Arc::new(FixtureTransport);
    let heartbeat = Arc::new(Heartbeat::new(
        registry.clone(),
        transport.clone(),
        HeartbeatCfg {
            interval: Duration::from_secs(300),
            rain_column: "Rain_mm_Tot".to_string(),
            rolling_window: 12,
        },
    ));
    let state = AppState {
        batch: BatchUpdater::new(registry.clone()),
        registry: registry.clone(),
        transport,
        heartbeat,
    };
    (api::create_router(state), registry)
}

async fn body_json(resp: axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    serde_json::from_slice(&bytes).expect("parse json body")
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let (app, _) = test_router();

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let body = String::from_utf8(bytes).expect("utf8");
    assert_eq!(body.trim(), "OK", "health body should be 'OK'");
}

#[tokio::test]
async fn api_batch_update_applies_and_reports_count() {
    let (app, registry) = test_router();

    let payload = json!([
        { "station_id": 1, "precipitation": 2.5, "soil_saturation": 61.0 },
        { "station_id": 2, "precipitation": 0.0, "soil_saturation": 12.5 }
    ]);
    let req = Request::builder()
        .method("POST")
        .uri("/stations/batch-update")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST /stations/batch-update");

    let resp = app.oneshot(req).await.expect("oneshot batch-update");
    assert!(
        resp.status().is_success(),
        "POST /stations/batch-update should be 2xx, got {}",
        resp.status()
    );
    let v = body_json(resp).await;
    assert_eq!(v.get("applied").and_then(Json::as_u64), Some(2));

    let stations = registry.list_stations().await.unwrap();
    assert_eq!(stations[0].soil_saturation, Some(61.0));
    assert_eq!(stations[1].precipitation, Some(0.0));
    assert!(stations[1].last_updated.is_some());
}

#[tokio::test]
async fn api_batch_update_with_unknown_station_applies_nothing() {
    let (app, registry) = test_router();

    let payload = json!([
        { "station_id": 1, "precipitation": 2.5, "soil_saturation": 61.0 },
        { "station_id": 99, "precipitation": 0.0, "soil_saturation": 1.0 }
    ]);
    let req = Request::builder()
        .method("POST")
        .uri("/stations/batch-update")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST /stations/batch-update");

    let resp = app.oneshot(req).await.expect("oneshot batch-update");
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let stations = registry.list_stations().await.unwrap();
    assert!(stations[0].soil_saturation.is_none());
}

#[tokio::test]
async fn api_stations_lists_the_fleet() {
    let (app, _) = test_router();

    let req = Request::builder()
        .method("GET")
        .uri("/stations")
        .body(Body::empty())
        .expect("build GET /stations");

    let resp = app.oneshot(req).await.expect("oneshot /stations");
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    let arr = v.as_array().expect("stations must be an array");
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0].get("id").and_then(Json::as_i64), Some(1));
    assert!(arr[0].get("wc1_max").is_some(), "thresholds are flattened");
}

#[tokio::test]
async fn api_station_history_returns_daily_aggregates() {
    let (app, _) = test_router();

    let req = Request::builder()
        .method("GET")
        .uri("/stations/1/history")
        .body(Body::empty())
        .expect("build GET /stations/1/history");

    let resp = app.oneshot(req).await.expect("oneshot history");
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    let days = v.as_array().expect("history must be an array");
    assert_eq!(days.len(), 1);
    assert_eq!(days[0].get("count").and_then(Json::as_u64), Some(2));
    let avgs = days[0].get("wc_avg").and_then(Json::as_array).unwrap();
    assert_eq!(avgs[0].as_f64(), Some(11.0));
    assert_eq!(avgs[3].as_f64(), Some(41.0));
}

#[tokio::test]
async fn api_station_history_404s_without_a_history_file() {
    let (app, _) = test_router();

    let req = Request::builder()
        .method("GET")
        .uri("/stations/2/history")
        .body(Body::empty())
        .expect("build GET /stations/2/history");

    let resp = app.oneshot(req).await.expect("oneshot history");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_debug_heartbeat_reports_idle_state() {
    let (app, _) = test_router();

    let req = Request::builder()
        .method("GET")
        .uri("/debug/heartbeat")
        .body(Body::empty())
        .expect("build GET /debug/heartbeat");

    let resp = app.oneshot(req).await.expect("oneshot /debug/heartbeat");
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    assert_eq!(v.get("state").and_then(Json::as_str), Some("idle"));
    assert!(v
        .get("recent_cycles")
        .and_then(Json::as_array)
        .is_some_and(|a| a.is_empty()));
}
