//! Domain layer: the broker capability, the catalog and command model, and
//! the composite broker that routes between members.
//!
//! Every broker, leaf or composite, implements [`Broker`]. A
//! [`CompositeBroker`] merges the catalogs of its members and dispatches
//! each command to the member that owns the command's service id.

pub mod broker;
pub mod catalog;
pub mod command;
pub mod composite;
pub mod memory_broker;
pub mod query;

pub use broker::{Broker, BrokerHandle};
pub use catalog::{
    Catalog, DashboardClient, InputParameters, JsonObject, Plan, Schemas, Service,
    ServiceBindingSchema, ServiceBuilder, ServiceInstanceSchema,
};
pub use command::{
    BindResource, Command, DeleteBindingCommand, DeleteBindingResponse,
    DeleteServiceInstanceCommand, DeleteServiceInstanceResponse, PreviousValues,
    ProvisionBindingCommand, ProvisionBindingResponse, ProvisionServiceInstanceCommand,
    ProvisionServiceInstanceResponse, UpdateServiceInstanceCommand, UpdateServiceInstanceResponse,
};
pub use composite::{CompositeBroker, DEFAULT_DISCOVERY_CONCURRENCY, DiscoveryConfig};
pub use memory_broker::{InMemoryBroker, InstanceRecord};
pub use query::{LastOperation, LastOperationQuery, LastOperationState};
