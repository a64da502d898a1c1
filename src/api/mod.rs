//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Broker endpoints are mounted under `/v2`; health and admin endpoints
//! sit at the root.

pub mod dto;
pub mod handlers;

use axum::Router;

use crate::app_state::AppState;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/v2", handlers::routes())
        .merge(handlers::system::routes())
}
