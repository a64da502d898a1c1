//! Marketplace catalog: services and their plans.
//!
//! A [`Catalog`] is an immutable snapshot of the [`Service`]s a broker
//! currently offers. Services are keyed logically by id: two `Service`
//! values compare equal iff their ids are equal, so a catalog never holds
//! two services with the same id.

use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// Free-form JSON object used for metadata, parameters and credentials.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Immutable collection of [`Service`]s, unique by service id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    services: Vec<Service>,
}

impl Catalog {
    /// Builds a catalog from the given services.
    ///
    /// When several services share an id, the last one wins.
    #[must_use]
    pub fn new(services: impl IntoIterator<Item = Service>) -> Self {
        let mut by_id: HashMap<String, Service> = HashMap::new();
        for service in services {
            by_id.insert(service.id.clone(), service);
        }
        let mut services: Vec<Service> = by_id.into_values().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Self { services }
    }

    /// Returns an empty catalog.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the services in this catalog, ordered by id.
    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Looks up a service by id.
    #[must_use]
    pub fn service(&self, service_id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == service_id)
    }

    /// Returns `true` if a service with the given id is offered.
    #[must_use]
    pub fn contains(&self, service_id: &str) -> bool {
        self.service(service_id).is_some()
    }

    /// Returns the set of service ids in this catalog.
    #[must_use]
    pub fn service_ids(&self) -> BTreeSet<&str> {
        self.services.iter().map(|s| s.id.as_str()).collect()
    }

    /// Returns the number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if the catalog offers no services.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Checks structural requirements that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidArgument`] if a service has an empty
    /// id or no plans, if a plan has an empty id, or if two services in the
    /// serialized form share an id.
    pub fn validate(&self) -> Result<(), BrokerError> {
        let mut seen = BTreeSet::new();
        for service in &self.services {
            service.validate()?;
            if !seen.insert(service.id.as_str()) {
                return Err(BrokerError::InvalidArgument(format!(
                    "duplicate service id {}",
                    service.id
                )));
            }
        }
        Ok(())
    }
}

/// A marketplace-listed offering.
///
/// Equality and hashing consider the id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Globally unique service identifier.
    pub id: String,
    /// CLI-friendly service name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Tags for marketplace filtering.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Platform permissions the service requires (e.g. `"syslog_drain"`).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub requires: BTreeSet<String>,
    /// Whether instances of this service can be bound by default.
    pub bindable: bool,
    /// Opaque marketplace metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: JsonObject,
    /// OAuth client used by the service dashboard, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_client: Option<DashboardClient>,
    /// Whether instances may change plan through an update.
    #[serde(default)]
    pub plan_updateable: bool,
    /// Purchasable tiers. Never empty for a valid service.
    pub plans: Vec<Plan>,
}

impl Service {
    /// Starts building a service with the required fields.
    #[must_use]
    pub fn builder(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> ServiceBuilder {
        ServiceBuilder {
            service: Self {
                id: id.into(),
                name: name.into(),
                description: description.into(),
                tags: BTreeSet::new(),
                requires: BTreeSet::new(),
                bindable: false,
                metadata: JsonObject::new(),
                dashboard_client: None,
                plan_updateable: false,
                plans: Vec::new(),
            },
        }
    }

    /// Looks up a plan by id.
    #[must_use]
    pub fn plan(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    /// Returns whether the given plan is bindable, falling back to the
    /// service-level flag when the plan does not override it.
    ///
    /// Returns `None` if the plan is not part of this service.
    #[must_use]
    pub fn is_plan_bindable(&self, plan_id: &str) -> Option<bool> {
        self.plan(plan_id)
            .map(|plan| plan.bindable.unwrap_or(self.bindable))
    }

    fn validate(&self) -> Result<(), BrokerError> {
        if self.id.is_empty() {
            return Err(BrokerError::InvalidArgument(format!(
                "service {:?} has an empty id",
                self.name
            )));
        }
        if self.plans.is_empty() {
            return Err(BrokerError::InvalidArgument(format!(
                "service {} has no plans",
                self.id
            )));
        }
        if self.plans.iter().any(|p| p.id.is_empty()) {
            return Err(BrokerError::InvalidArgument(format!(
                "service {} has a plan with an empty id",
                self.id
            )));
        }
        Ok(())
    }
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Service {}

impl Hash for Service {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Incremental constructor for [`Service`].
#[derive(Debug, Clone)]
pub struct ServiceBuilder {
    service: Service,
}

impl ServiceBuilder {
    /// Adds a marketplace tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.service.tags.insert(tag.into());
        self
    }

    /// Adds a required platform permission.
    #[must_use]
    pub fn requires(mut self, permission: impl Into<String>) -> Self {
        self.service.requires.insert(permission.into());
        self
    }

    /// Sets the service-level bindable flag.
    #[must_use]
    pub const fn bindable(mut self, bindable: bool) -> Self {
        self.service.bindable = bindable;
        self
    }

    /// Sets the marketplace metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: JsonObject) -> Self {
        self.service.metadata = metadata;
        self
    }

    /// Sets the dashboard OAuth client.
    #[must_use]
    pub fn dashboard_client(mut self, client: DashboardClient) -> Self {
        self.service.dashboard_client = Some(client);
        self
    }

    /// Sets whether instances may change plan.
    #[must_use]
    pub const fn plan_updateable(mut self, plan_updateable: bool) -> Self {
        self.service.plan_updateable = plan_updateable;
        self
    }

    /// Appends a plan.
    #[must_use]
    pub fn plan(mut self, plan: Plan) -> Self {
        self.service.plans.push(plan);
        self
    }

    /// Finishes the service.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidArgument`] if the id is empty, no plan
    /// was added, or a plan has an empty id.
    pub fn build(self) -> Result<Service, BrokerError> {
        self.service.validate()?;
        Ok(self.service)
    }
}

/// OAuth client credentials for a service dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardClient {
    /// OAuth client id.
    pub id: String,
    /// OAuth client secret.
    pub secret: String,
    /// Redirect URI registered for the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

/// One purchasable tier of a [`Service`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier, unique within the service.
    pub id: String,
    /// CLI-friendly plan name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Opaque marketplace metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: JsonObject,
    /// Whether the plan is free of charge.
    #[serde(default = "default_free")]
    pub free: bool,
    /// Plan-level override of the service's bindable flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindable: Option<bool>,
    /// JSON schemas for configuration parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schemas: Option<Schemas>,
}

impl Plan {
    /// Creates a free plan with no metadata, bindable override, or schemas.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            metadata: JsonObject::new(),
            free: true,
            bindable: None,
            schemas: None,
        }
    }

    /// Sets whether the plan is free.
    #[must_use]
    pub const fn with_free(mut self, free: bool) -> Self {
        self.free = free;
        self
    }

    /// Overrides the service-level bindable flag for this plan.
    #[must_use]
    pub const fn with_bindable(mut self, bindable: bool) -> Self {
        self.bindable = Some(bindable);
        self
    }

    /// Attaches parameter schemas.
    #[must_use]
    pub fn with_schemas(mut self, schemas: Schemas) -> Self {
        self.schemas = Some(schemas);
        self
    }
}

const fn default_free() -> bool {
    true
}

/// Parameter schemas for a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schemas {
    /// Schemas for service-instance operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_instance: Option<ServiceInstanceSchema>,
    /// Schemas for binding operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_binding: Option<ServiceBindingSchema>,
}

/// Schemas accepted when creating or updating an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstanceSchema {
    /// Schema for provisioning parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<InputParameters>,
    /// Schema for update parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<InputParameters>,
}

/// Schemas accepted when creating a binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceBindingSchema {
    /// Schema for binding parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<InputParameters>,
}

/// A JSON schema describing accepted input parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputParameters {
    /// The JSON schema document.
    pub parameters: serde_json::Value,
}
