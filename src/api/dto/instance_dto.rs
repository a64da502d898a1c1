//! Service-instance request DTOs.

use serde::Deserialize;

use crate::domain::{
    JsonObject, PreviousValues, ProvisionServiceInstanceCommand, UpdateServiceInstanceCommand,
};
use crate::error::BrokerError;

/// Body of `PUT /v2/service_instances/{instance_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionRequest {
    /// Service to provision; used for routing.
    #[serde(default)]
    pub service_id: Option<String>,
    /// Plan to provision.
    pub plan_id: String,
    /// Platform organization GUID.
    #[serde(default)]
    pub organization_guid: String,
    /// Platform space GUID.
    #[serde(default)]
    pub space_guid: String,
    /// Platform-specific context.
    #[serde(default)]
    pub context: JsonObject,
    /// Broker-specific configuration parameters.
    #[serde(default)]
    pub parameters: JsonObject,
}

impl ProvisionRequest {
    /// Converts the body into a command for `instance_id`.
    #[must_use]
    pub fn into_command(
        self,
        instance_id: String,
        accepts_incomplete: bool,
    ) -> ProvisionServiceInstanceCommand {
        ProvisionServiceInstanceCommand::new(
            instance_id,
            self.service_id.unwrap_or_default(),
            self.plan_id,
            self.organization_guid,
            self.space_guid,
        )
        .with_context(self.context)
        .with_parameters(self.parameters)
        .accepts_incomplete(accepts_incomplete)
    }
}

/// Body of `PATCH /v2/service_instances/{instance_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    /// Service the instance belongs to; used for routing.
    #[serde(default)]
    pub service_id: Option<String>,
    /// Target plan. Defaults to the previous plan when omitted.
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Platform-specific context.
    #[serde(default)]
    pub context: JsonObject,
    /// Broker-specific configuration parameters.
    #[serde(default)]
    pub parameters: JsonObject,
    /// Attributes of the instance before the update.
    #[serde(default)]
    pub previous_values: Option<PreviousValues>,
}

impl UpdateRequest {
    /// Converts the body into a command for `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidArgument`] if neither `plan_id` nor
    /// `previous_values.plan_id` is present.
    pub fn into_command(
        self,
        instance_id: String,
        accepts_incomplete: bool,
    ) -> Result<UpdateServiceInstanceCommand, BrokerError> {
        let plan_id = self
            .plan_id
            .or_else(|| self.previous_values.as_ref().and_then(|p| p.plan_id.clone()))
            .ok_or_else(|| BrokerError::InvalidArgument("plan_id is required".to_string()))?;

        let service_id = self.service_id.unwrap_or_default();
        let mut command = UpdateServiceInstanceCommand::new(instance_id, service_id, plan_id)
            .with_parameters(self.parameters)
            .accepts_incomplete(accepts_incomplete);
        command.context = self.context;
        if let Some(previous) = self.previous_values {
            command = command.with_previous_values(previous);
        }
        Ok(command)
    }
}

/// Query of `GET /v2/service_instances/{instance_id}/last_operation`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastOperationParams {
    /// Service the instance belongs to; used for routing.
    #[serde(default)]
    pub service_id: Option<String>,
    /// Plan the instance belongs to.
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Operation id returned by the asynchronous request.
    #[serde(default)]
    pub operation: Option<String>,
}
