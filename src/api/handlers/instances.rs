//! Service-instance handlers: provision, update, deprovision, poll.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};

use crate::api::dto::{
    AcceptsIncompleteParams, DeleteParams, LastOperationParams, ProvisionRequest, UpdateRequest,
};
use crate::app_state::AppState;
use crate::domain::{Broker, DeleteServiceInstanceCommand, LastOperationQuery};
use crate::error::BrokerError;

const fn accepted_or(operation: Option<&String>, done: StatusCode) -> StatusCode {
    if operation.is_some() {
        StatusCode::ACCEPTED
    } else {
        done
    }
}

/// `PUT /v2/service_instances/{instance_id}`: Provision an instance.
///
/// Responds `201 Created`, or `202 Accepted` when the owning broker
/// started an asynchronous operation.
///
/// # Errors
///
/// Returns [`BrokerError::InvalidCommand`] if no member offers the service,
/// or the member's error otherwise.
pub async fn provision(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(params): Query<AcceptsIncompleteParams>,
    Json(req): Json<ProvisionRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    let command = req.into_command(instance_id, params.accepts_incomplete);
    let response = state.broker.provision_service_instance(&command).await?;
    let status = accepted_or(response.operation.as_ref(), StatusCode::CREATED);
    Ok((status, Json(response)))
}

/// `PATCH /v2/service_instances/{instance_id}`: Update an instance.
///
/// # Errors
///
/// Returns [`BrokerError::InvalidArgument`] if no plan can be determined,
/// [`BrokerError::InvalidCommand`] on a routing miss, or the member's error.
pub async fn update(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(params): Query<AcceptsIncompleteParams>,
    Json(req): Json<UpdateRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    let command = req.into_command(instance_id, params.accepts_incomplete)?;
    let response = state.broker.update_service_instance(&command).await?;
    let status = accepted_or(response.operation.as_ref(), StatusCode::OK);
    Ok((status, Json(response)))
}

/// `DELETE /v2/service_instances/{instance_id}`: Deprovision an instance.
///
/// # Errors
///
/// Returns [`BrokerError::InvalidCommand`] on a routing miss, or the
/// member's error.
pub async fn deprovision(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<impl IntoResponse, BrokerError> {
    let service_id = params.service_id.unwrap_or_default();
    let command = DeleteServiceInstanceCommand::new(instance_id, service_id, params.plan_id)
        .accepts_incomplete(params.accepts_incomplete);
    let response = state.broker.delete_service_instance(&command).await?;
    let status = accepted_or(response.operation.as_ref(), StatusCode::OK);
    Ok((status, Json(response)))
}

/// `GET /v2/service_instances/{instance_id}/last_operation`: Poll the
/// last asynchronous operation.
///
/// # Errors
///
/// Returns [`BrokerError::InvalidQuery`] if `service_id` is missing or not
/// routed, or the member's error.
pub async fn last_operation(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(params): Query<LastOperationParams>,
) -> Result<impl IntoResponse, BrokerError> {
    let query = LastOperationQuery {
        service_id: params.service_id,
        instance_id: Some(instance_id),
        plan_id: params.plan_id,
        operation: params.operation,
    };
    let status = state.broker.last_operation(&query).await?;
    Ok(Json(status))
}

/// Service-instance routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/service_instances/{instance_id}",
            put(provision).patch(update).delete(deprovision),
        )
        .route(
            "/service_instances/{instance_id}/last_operation",
            get(last_operation),
        )
}
