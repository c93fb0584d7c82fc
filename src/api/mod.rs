//! REST and WebSocket API for the enrichment pipeline

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::enrich::Enricher;
use crate::models::{EnrichRequest, TagRequest};
use crate::sink::Event;
use crate::storage::ThreatRepo;

/// Application state shared across handlers
pub struct AppState {
    pub repo: ThreatRepo,
    pub enricher: Arc<Enricher>,
    pub events: broadcast::Sender<Event>,
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Enrichment and tagging triggers
        .route("/api/v1/enrich", post(trigger_enrichment))
        .route("/api/v1/tags", post(add_tag))
        // Threat records
        .route("/api/v1/threats", get(recent_threats))
        // Statistics
        .route("/api/v1/stats", get(get_kpis))
        .route("/api/v1/stats/by_source", get(stats_by_source))
        .route("/api/v1/stats/by_severity", get(stats_by_severity))
        .route("/api/v1/stats/top_countries", get(stats_top_countries))
        // Administrative operations
        .route("/api/v1/export", get(export_threats))
        .route("/api/v1/clear", post(clear_threats))
        // Real-time event stream
        .route("/ws", get(ws_handler))
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

// ==================== Handlers ====================

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "threatpulse",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn trigger_enrichment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnrichRequest>,
) -> (StatusCode, Json<Value>) {
    let indicator = req.indicator.clone();

    // The run streams its results over the event channel; an empty
    // indicator is a silent no-op inside the orchestrator.
    let enricher = state.enricher.clone();
    tokio::spawn(async move {
        enricher.enrich(&req.indicator).await;
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "queued", "indicator": indicator })),
    )
}

async fn add_tag(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TagRequest>,
) -> Result<Json<Value>, ApiError> {
    let tagged = state
        .enricher
        .add_tag(&req.threat_id, &req.tag)
        .await
        .map_err(internal_error)?;

    if !tagged {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Threat record not found" })),
        ));
    }

    Ok(Json(json!({ "threat_id": req.threat_id, "tag": req.tag })))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<i64>,
}

async fn recent_threats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Value>, ApiError> {
    let threats = state
        .repo
        .recent(query.limit.unwrap_or(50).clamp(1, 1000))
        .await
        .map_err(internal_error)?;

    Ok(Json(json!({ "threats": threats })))
}

async fn get_kpis(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let kpis = state.repo.kpis().await.map_err(internal_error)?;
    Ok(Json(json!(kpis)))
}

async fn stats_by_source(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let buckets = state.repo.counts_by_source().await.map_err(internal_error)?;
    Ok(Json(json!(buckets)))
}

async fn stats_by_severity(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let buckets = state
        .repo
        .counts_by_severity()
        .await
        .map_err(internal_error)?;
    Ok(Json(json!(buckets)))
}

async fn stats_top_countries(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let buckets = state.repo.top_countries(5).await.map_err(internal_error)?;
    Ok(Json(json!(buckets)))
}

async fn export_threats(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let csv = state.repo.export_csv().await.map_err(internal_error)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"threat_data.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

async fn clear_threats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let deleted = state.repo.delete_all().await.map_err(internal_error)?;

    Ok(Json(json!({
        "message": format!("Successfully deleted {deleted} records from the database."),
        "status": "success",
    })))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

/// Forward broadcast events to one WebSocket subscriber until it hangs up
async fn stream_events(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.events.subscribe();

    loop {
        match rx.recv().await {
            Ok(event) => {
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "WebSocket subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
