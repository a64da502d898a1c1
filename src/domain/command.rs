//! Broker commands and their responses.
//!
//! Every command names the service id and plan id it targets. The
//! composite broker routes on the service id; leaf brokers use both.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::catalog::JsonObject;

/// Provisions a new service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionServiceInstanceCommand {
    /// Instance identifier chosen by the platform.
    pub instance_id: Option<String>,
    /// Service to provision.
    pub service_id: String,
    /// Plan to provision.
    pub plan_id: String,
    /// Platform organization the instance belongs to.
    pub organization_guid: String,
    /// Platform space the instance belongs to.
    pub space_guid: String,
    /// Platform-specific contextual data.
    #[serde(default)]
    pub context: JsonObject,
    /// Caller-supplied configuration parameters.
    #[serde(default)]
    pub parameters: JsonObject,
    /// Whether the caller tolerates an asynchronous response.
    #[serde(default)]
    pub accepts_incomplete: bool,
}

impl ProvisionServiceInstanceCommand {
    /// Creates a synchronous provision command with no context or parameters.
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        service_id: impl Into<String>,
        plan_id: impl Into<String>,
        organization_guid: impl Into<String>,
        space_guid: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            service_id: service_id.into(),
            plan_id: plan_id.into(),
            organization_guid: organization_guid.into(),
            space_guid: space_guid.into(),
            context: JsonObject::new(),
            parameters: JsonObject::new(),
            accepts_incomplete: false,
        }
    }

    /// Sets the configuration parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: JsonObject) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the platform context.
    #[must_use]
    pub fn with_context(mut self, context: JsonObject) -> Self {
        self.context = context;
        self
    }

    /// Sets whether an asynchronous response is acceptable.
    #[must_use]
    pub const fn accepts_incomplete(mut self, accepts_incomplete: bool) -> Self {
        self.accepts_incomplete = accepts_incomplete;
        self
    }

    /// Returns the named parameter deserialized as `T`, or `None` if it is
    /// missing or has a different shape.
    #[must_use]
    pub fn parameter<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        typed_parameter(&self.parameters, name)
    }
}

/// Response to a [`ProvisionServiceInstanceCommand`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionServiceInstanceResponse {
    /// URL of a web dashboard for the new instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    /// Operation id when provisioning continues asynchronously.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// Values an instance had before an update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousValues {
    /// Previous service id. Deprecated in the broker API but still sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    /// Previous plan id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    /// Previous organization id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Previous space id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
}

/// Updates an existing service instance, possibly changing its plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateServiceInstanceCommand {
    /// Instance to update.
    pub instance_id: Option<String>,
    /// Service the instance belongs to.
    pub service_id: String,
    /// Target plan.
    pub plan_id: String,
    /// Platform-specific contextual data.
    #[serde(default)]
    pub context: JsonObject,
    /// Caller-supplied configuration parameters.
    #[serde(default)]
    pub parameters: JsonObject,
    /// Whether the caller tolerates an asynchronous response.
    #[serde(default)]
    pub accepts_incomplete: bool,
    /// Values before this update.
    #[serde(default)]
    pub previous_values: Option<PreviousValues>,
}

impl UpdateServiceInstanceCommand {
    /// Creates a synchronous update command with no context or parameters.
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        service_id: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            service_id: service_id.into(),
            plan_id: plan_id.into(),
            context: JsonObject::new(),
            parameters: JsonObject::new(),
            accepts_incomplete: false,
            previous_values: None,
        }
    }

    /// Sets the configuration parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: JsonObject) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the values the instance had before the update.
    #[must_use]
    pub fn with_previous_values(mut self, previous_values: PreviousValues) -> Self {
        self.previous_values = Some(previous_values);
        self
    }

    /// Sets whether an asynchronous response is acceptable.
    #[must_use]
    pub const fn accepts_incomplete(mut self, accepts_incomplete: bool) -> Self {
        self.accepts_incomplete = accepts_incomplete;
        self
    }

    /// Returns the named parameter deserialized as `T`.
    #[must_use]
    pub fn parameter<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        typed_parameter(&self.parameters, name)
    }
}

/// Response to an [`UpdateServiceInstanceCommand`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateServiceInstanceResponse {
    /// Operation id when the update continues asynchronously.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// Deprovisions a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteServiceInstanceCommand {
    /// Instance to delete.
    pub instance_id: Option<String>,
    /// Service the instance belongs to.
    pub service_id: String,
    /// Plan the instance belongs to.
    pub plan_id: String,
    /// Whether the caller tolerates an asynchronous response.
    #[serde(default)]
    pub accepts_incomplete: bool,
}

impl DeleteServiceInstanceCommand {
    /// Creates a synchronous delete command.
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        service_id: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            service_id: service_id.into(),
            plan_id: plan_id.into(),
            accepts_incomplete: false,
        }
    }

    /// Sets whether an asynchronous response is acceptable.
    #[must_use]
    pub const fn accepts_incomplete(mut self, accepts_incomplete: bool) -> Self {
        self.accepts_incomplete = accepts_incomplete;
        self
    }
}

/// Response to a [`DeleteServiceInstanceCommand`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteServiceInstanceResponse {
    /// Operation id when deletion continues asynchronously.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// Resource a binding is created for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindResource {
    /// Application the credentials are issued to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_guid: Option<String>,
    /// Route for route-service bindings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

/// Creates a binding against a service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionBindingCommand {
    /// Binding identifier chosen by the platform.
    pub binding_id: Option<String>,
    /// Instance being bound.
    pub instance_id: Option<String>,
    /// Service the instance belongs to.
    pub service_id: String,
    /// Plan the instance belongs to.
    pub plan_id: String,
    /// What the binding is for.
    #[serde(default)]
    pub bind_resource: Option<BindResource>,
    /// Caller-supplied binding parameters.
    #[serde(default)]
    pub parameters: JsonObject,
}

impl ProvisionBindingCommand {
    /// Creates a bind command with no resource or parameters.
    #[must_use]
    pub fn new(
        binding_id: impl Into<String>,
        instance_id: impl Into<String>,
        service_id: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        Self {
            binding_id: Some(binding_id.into()),
            instance_id: Some(instance_id.into()),
            service_id: service_id.into(),
            plan_id: plan_id.into(),
            bind_resource: None,
            parameters: JsonObject::new(),
        }
    }

    /// Sets the bind resource.
    #[must_use]
    pub fn with_bind_resource(mut self, bind_resource: BindResource) -> Self {
        self.bind_resource = Some(bind_resource);
        self
    }

    /// Sets the binding parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: JsonObject) -> Self {
        self.parameters = parameters;
        self
    }

    /// Returns the named parameter deserialized as `T`.
    #[must_use]
    pub fn parameter<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        typed_parameter(&self.parameters, name)
    }
}

/// Response to a [`ProvisionBindingCommand`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionBindingResponse {
    /// Credentials handed to the bound application.
    #[serde(default)]
    pub credentials: JsonObject,
    /// Syslog drain the platform should stream logs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog_drain_url: Option<String>,
    /// Route service URL for route-service bindings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,
    /// Volume mounts for volume-service bindings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<JsonObject>,
}

/// Deletes a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteBindingCommand {
    /// Binding to delete.
    pub binding_id: Option<String>,
    /// Instance the binding belongs to.
    pub instance_id: Option<String>,
    /// Service the instance belongs to.
    pub service_id: String,
    /// Plan the instance belongs to.
    pub plan_id: String,
}

impl DeleteBindingCommand {
    /// Creates an unbind command.
    #[must_use]
    pub fn new(
        binding_id: impl Into<String>,
        instance_id: impl Into<String>,
        service_id: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        Self {
            binding_id: Some(binding_id.into()),
            instance_id: Some(instance_id.into()),
            service_id: service_id.into(),
            plan_id: plan_id.into(),
        }
    }
}

/// Response to a [`DeleteBindingCommand`]. Carries no data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteBindingResponse {}

/// Any of the five broker commands, used as error context.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// See [`ProvisionServiceInstanceCommand`].
    ProvisionServiceInstance(ProvisionServiceInstanceCommand),
    /// See [`UpdateServiceInstanceCommand`].
    UpdateServiceInstance(UpdateServiceInstanceCommand),
    /// See [`DeleteServiceInstanceCommand`].
    DeleteServiceInstance(DeleteServiceInstanceCommand),
    /// See [`ProvisionBindingCommand`].
    ProvisionBinding(ProvisionBindingCommand),
    /// See [`DeleteBindingCommand`].
    DeleteBinding(DeleteBindingCommand),
}

impl Command {
    /// Returns the targeted service id.
    #[must_use]
    pub fn service_id(&self) -> &str {
        match self {
            Self::ProvisionServiceInstance(c) => &c.service_id,
            Self::UpdateServiceInstance(c) => &c.service_id,
            Self::DeleteServiceInstance(c) => &c.service_id,
            Self::ProvisionBinding(c) => &c.service_id,
            Self::DeleteBinding(c) => &c.service_id,
        }
    }

    /// Returns the targeted plan id.
    #[must_use]
    pub fn plan_id(&self) -> &str {
        match self {
            Self::ProvisionServiceInstance(c) => &c.plan_id,
            Self::UpdateServiceInstance(c) => &c.plan_id,
            Self::DeleteServiceInstance(c) => &c.plan_id,
            Self::ProvisionBinding(c) => &c.plan_id,
            Self::DeleteBinding(c) => &c.plan_id,
        }
    }

    /// Returns a short snake_case name for the command kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ProvisionServiceInstance(_) => "provision_service_instance",
            Self::UpdateServiceInstance(_) => "update_service_instance",
            Self::DeleteServiceInstance(_) => "delete_service_instance",
            Self::ProvisionBinding(_) => "provision_binding",
            Self::DeleteBinding(_) => "delete_binding",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (service {:?}, plan {:?})",
            self.kind(),
            self.service_id(),
            self.plan_id()
        )
    }
}

impl From<ProvisionServiceInstanceCommand> for Command {
    fn from(command: ProvisionServiceInstanceCommand) -> Self {
        Self::ProvisionServiceInstance(command)
    }
}

impl From<UpdateServiceInstanceCommand> for Command {
    fn from(command: UpdateServiceInstanceCommand) -> Self {
        Self::UpdateServiceInstance(command)
    }
}

impl From<DeleteServiceInstanceCommand> for Command {
    fn from(command: DeleteServiceInstanceCommand) -> Self {
        Self::DeleteServiceInstance(command)
    }
}

impl From<ProvisionBindingCommand> for Command {
    fn from(command: ProvisionBindingCommand) -> Self {
        Self::ProvisionBinding(command)
    }
}

impl From<DeleteBindingCommand> for Command {
    fn from(command: DeleteBindingCommand) -> Self {
        Self::DeleteBinding(command)
    }
}

fn typed_parameter<T: DeserializeOwned>(parameters: &JsonObject, name: &str) -> Option<T> {
    parameters
        .get(name)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}
