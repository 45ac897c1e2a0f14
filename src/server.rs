//! Status Service
//!
//! Read-only HTTP view of the ledger plus the periodic publish task.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::anchor::AnchorStore;
use crate::error::LedgerError;
use crate::ledger::EventStore;
use crate::publish::Publisher;

const DEFAULT_RECENT_LIMIT: u32 = 20;

#[derive(Clone)]
pub struct AppState {
    pub store: EventStore,
    pub anchors: AnchorStore,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_endpoint))
        .route("/events/recent", get(recent_events))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serve until the listener fails.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Publish every `period`, starting one period from now. Failures are
/// logged and the next tick tries again.
pub fn spawn_publish_task(
    publisher: Arc<Publisher>,
    label: String,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        loop {
            interval.tick().await;
            match publisher.publish(&label).await {
                Ok(report) => info!("Scheduled publish done: {}", report.subject),
                Err(e) => error!("Scheduled publish failed: {}", e),
            }
        }
    })
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "decision-ledger",
        "timestamp": chrono::Utc::now()
    }))
}

async fn status_endpoint(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (tip, count) = match tokio::try_join!(state.store.tip(), state.store.count()) {
        Ok(pair) => pair,
        Err(e) => return error_response(&e),
    };

    let anchor = match state.anchors.read_anchor() {
        Ok(anchor) => json!({
            "latest_hash": anchor.latest_hash,
            "timestamp": anchor.timestamp,
            "note": anchor.note,
            "matches_tip": anchor.latest_hash == tip,
        }),
        Err(e) => json!({ "error": e.to_string() }),
    };

    (
        StatusCode::OK,
        Json(json!({
            "tip": tip,
            "event_count": count,
            "anchor": anchor,
        })),
    )
}

async fn recent_events(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> (StatusCode, Json<Value>) {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    match state.store.list_recent(limit).await {
        Ok(events) => (StatusCode::OK, Json(json!({ "events": events }))),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &LedgerError) -> (StatusCode, Json<Value>) {
    let status = match err {
        LedgerError::ValidationError(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}
