//! Service-binding handlers: bind and unbind.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::put;
use axum::{Json, Router};

use crate::api::dto::{BindRequest, DeleteParams};
use crate::app_state::AppState;
use crate::domain::{Broker, DeleteBindingCommand};
use crate::error::BrokerError;

/// `PUT /v2/service_instances/{instance_id}/service_bindings/{binding_id}`
/// Create a binding.
///
/// # Errors
///
/// Returns [`BrokerError::InvalidCommand`] on a routing miss, or the
/// member's error.
pub async fn bind(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Json(req): Json<BindRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    let command = req.into_command(instance_id, binding_id);
    let response = state.broker.provision_binding(&command).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `DELETE /v2/service_instances/{instance_id}/service_bindings/{binding_id}`
/// Delete a binding.
///
/// # Errors
///
/// Returns [`BrokerError::InvalidCommand`] on a routing miss, or the
/// member's error.
pub async fn unbind(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Query(params): Query<DeleteParams>,
) -> Result<impl IntoResponse, BrokerError> {
    let service_id = params.service_id.unwrap_or_default();
    let command = DeleteBindingCommand::new(binding_id, instance_id, service_id, params.plan_id);
    let response = state.broker.delete_binding(&command).await?;
    Ok((StatusCode::OK, Json(response)))
}

/// Service-binding routes.
pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/service_instances/{instance_id}/service_bindings/{binding_id}",
        put(bind).delete(unbind),
    )
}
