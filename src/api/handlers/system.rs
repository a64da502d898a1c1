//! System endpoints: health check, broker membership.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::api::dto::BrokersResponse;
use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    brokers: usize,
}

/// `GET /health`: Service health status.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            brokers: state.broker.broker_count().await,
        }),
    )
}

/// `GET /admin/brokers`: Members and the routing table of the root
/// composite.
pub async fn brokers_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut brokers: Vec<String> = state
        .broker
        .brokers()
        .await
        .iter()
        .map(ToString::to_string)
        .collect();
    brokers.sort();
    let routes = state
        .broker
        .routing_table()
        .await
        .into_iter()
        .map(|(service_id, owner)| (service_id, owner.to_string()))
        .collect();

    Json(BrokersResponse {
        brokers,
        routes,
        parallel_service_discovery: state.broker.parallel_service_discovery(),
    })
}

/// System routes mounted at the root level (not under /v2).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/admin/brokers", get(brokers_handler))
}
