//! HTTP API of the central controller
//!
//! Exposes liveness, the current path-selection weights, collection and push
//! statistics, a manual resync action, Prometheus metrics, and the alert
//! journal.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use control_lib::alerts::AlertJournal;
use control_lib::paths::{ForceSyncRequest, PathSelectionDocument, SharedCollection, SharedPushStats};
use control_lib::store::read_json;
use control_lib::HealthRegistry;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub health: HealthRegistry,
    pub journal: Arc<AlertJournal>,
    pub push_stats: SharedPushStats,
    pub collection: SharedCollection,
    pub weights_path: PathBuf,
    pub force_sync: mpsc::Sender<ForceSyncRequest>,
}

/// Liveness plus component detail.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.health().await;
    let status_code = if health.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status_code, Json(health))
}

/// The current path-selection document.
async fn current_weights(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match read_json::<PathSelectionDocument>(&state.weights_path) {
        Ok(document) => (
            StatusCode::OK,
            Json(json!({"success": true, "data": document})),
        ),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "Weights file not found yet"})),
        ),
    }
}

/// Push and collection counters.
async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let push_stats = state.push_stats.lock().unwrap().clone();
    let last_collection = state.collection.lock().unwrap().clone();
    Json(json!({
        "success": true,
        "push_stats": push_stats,
        "last_collection": last_collection,
    }))
}

/// Trigger an immediate resync of the weight document to the SDN host.
async fn force_sync(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    if state.force_sync.send(reply_tx).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"success": false, "message": "Path loop is not running"})),
        );
    }
    match reply_rx.await {
        Ok(true) => {
            info!("Manual weight resync completed");
            (StatusCode::OK, Json(json!({"success": true, "message": "Sync completed"})))
        }
        Ok(false) => (
            StatusCode::OK,
            Json(json!({"success": false, "message": "Sync failed"})),
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "message": "Sync request dropped"})),
        ),
    }
}

/// Prometheus exposition.
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()).into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    #[serde(default = "default_alert_limit")]
    limit: usize,
}

fn default_alert_limit() -> usize {
    50
}

/// Recent alerts, newest first.
async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    let alerts = state.journal.recent(query.limit);
    Json(json!({
        "alerts": alerts,
        "unacknowledged": state.journal.unacknowledged(),
    }))
}

/// Mark an alert as read.
async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.journal.acknowledge(&id) {
        (StatusCode::OK, Json(json!({"success": true})))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "unknown alert id"})),
        )
    }
}

/// Remove an alert.
async fn dismiss_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.journal.dismiss(&id) {
        (StatusCode::OK, Json(json!({"success": true})))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "unknown alert id"})),
        )
    }
}

/// Build the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/current_weights", get(current_weights))
        .route("/stats", get(stats))
        .route("/force_sync", post(force_sync))
        .route("/metrics", get(metrics))
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id/ack", post(acknowledge_alert))
        .route("/alerts/:id", delete(dismiss_alert))
        .with_state(state)
}

/// Bind and serve the API. A port that cannot be bound is fatal.
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("0.0.0.0:{port}");
    info!(addr = %addr, "Starting controller API");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
