//! Catalog handler.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::domain::{Broker, Catalog};
use crate::error::BrokerError;

/// `GET /v2/catalog`: Aggregated catalog of every member broker.
///
/// Each call re-aggregates and rebuilds the routing table.
///
/// # Errors
///
/// Returns the first member's [`BrokerError`] if any catalog fetch fails.
pub async fn get_catalog(State(state): State<AppState>) -> Result<Json<Catalog>, BrokerError> {
    let catalog = state.broker.catalog().await?;
    Ok(Json(catalog))
}

/// Catalog routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/catalog", get(get_catalog))
}
