//! Service-binding request DTOs.

use serde::Deserialize;

use crate::domain::{BindResource, JsonObject, ProvisionBindingCommand};

/// Body of `PUT /v2/service_instances/{instance_id}/service_bindings/{binding_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct BindRequest {
    /// Service the instance belongs to; used for routing.
    #[serde(default)]
    pub service_id: Option<String>,
    /// Plan the instance belongs to.
    pub plan_id: String,
    /// Resource the binding is created for.
    #[serde(default)]
    pub bind_resource: Option<BindResource>,
    /// Broker-specific configuration parameters.
    #[serde(default)]
    pub parameters: JsonObject,
}

impl BindRequest {
    /// Converts the body into a command for the given ids.
    #[must_use]
    pub fn into_command(self, instance_id: String, binding_id: String) -> ProvisionBindingCommand {
        let service_id = self.service_id.unwrap_or_default();
        let command =
            ProvisionBindingCommand::new(binding_id, instance_id, service_id, self.plan_id)
                .with_parameters(self.parameters);
        match self.bind_resource {
            Some(resource) => command.with_bind_resource(resource),
            None => command,
        }
    }
}
