//! The broker capability and broker identity.
//!
//! [`Broker`] is implemented by leaf brokers and by
//! [`super::CompositeBroker`] alike. [`BrokerHandle`] is the shared,
//! identity-compared reference the composite stores in its membership set
//! and routing table.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;

use super::catalog::Catalog;
use super::command::{
    DeleteBindingCommand, DeleteBindingResponse, DeleteServiceInstanceCommand,
    DeleteServiceInstanceResponse, ProvisionBindingCommand, ProvisionBindingResponse,
    ProvisionServiceInstanceCommand, ProvisionServiceInstanceResponse,
    UpdateServiceInstanceCommand, UpdateServiceInstanceResponse,
};
use super::query::{LastOperation, LastOperationQuery};
use crate::error::BrokerError;

/// A component that offers a catalog and provisions, updates, binds and
/// deletes service instances.
///
/// Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait Broker: Send + Sync + fmt::Debug {
    /// Returns the services this broker currently offers.
    ///
    /// An empty catalog is a valid result.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the underlying source cannot be queried.
    async fn catalog(&self) -> Result<Catalog, BrokerError>;

    /// Provisions a service instance.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] on any backend failure.
    async fn provision_service_instance(
        &self,
        command: &ProvisionServiceInstanceCommand,
    ) -> Result<ProvisionServiceInstanceResponse, BrokerError>;

    /// Updates a service instance.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] on any backend failure.
    async fn update_service_instance(
        &self,
        command: &UpdateServiceInstanceCommand,
    ) -> Result<UpdateServiceInstanceResponse, BrokerError>;

    /// Deprovisions a service instance.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] on any backend failure.
    async fn delete_service_instance(
        &self,
        command: &DeleteServiceInstanceCommand,
    ) -> Result<DeleteServiceInstanceResponse, BrokerError>;

    /// Creates a binding.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] on any backend failure.
    async fn provision_binding(
        &self,
        command: &ProvisionBindingCommand,
    ) -> Result<ProvisionBindingResponse, BrokerError>;

    /// Deletes a binding.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] on any backend failure.
    async fn delete_binding(
        &self,
        command: &DeleteBindingCommand,
    ) -> Result<DeleteBindingResponse, BrokerError>;

    /// Reports the state of the last asynchronous operation on an instance.
    ///
    /// Brokers without asynchronous operations keep the default, which
    /// fails with [`BrokerError::Unsupported`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unsupported`] by default.
    async fn last_operation(
        &self,
        _query: &LastOperationQuery,
    ) -> Result<LastOperation, BrokerError> {
        Err(BrokerError::Unsupported("last_operation".to_string()))
    }

    /// Returns whether this broker handles the given service id.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the answer cannot be determined.
    async fn is_supported_service_id(&self, service_id: &str) -> Result<bool, BrokerError> {
        Ok(!service_id.is_empty())
    }

    /// Returns whether this broker handles the given plan of a service.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the answer cannot be determined.
    async fn is_supported_plan_id(
        &self,
        _service_id: &str,
        plan_id: &str,
    ) -> Result<bool, BrokerError> {
        Ok(!plan_id.is_empty())
    }

    /// Returns whether instances of the given plan can be bound.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the answer cannot be determined.
    async fn is_plan_bindable(&self, service_id: &str, plan_id: &str)
    -> Result<bool, BrokerError>;

    /// Returns `true` if every mutating operation completes asynchronously.
    fn is_asynchronous_only(&self) -> bool {
        false
    }
}

/// Shared reference to a broker, compared and hashed by identity.
///
/// Two handles are equal only if they point at the same broker object;
/// structurally identical brokers created separately are never equal.
#[derive(Clone)]
pub struct BrokerHandle(Arc<dyn Broker>);

impl BrokerHandle {
    /// Wraps a broker in a new handle.
    #[must_use]
    pub fn new<B: Broker + 'static>(broker: B) -> Self {
        Self(Arc::new(broker))
    }

    /// Wraps an already shared broker without changing its identity.
    #[must_use]
    pub fn from_arc(broker: Arc<dyn Broker>) -> Self {
        Self(broker)
    }

    /// Returns `true` if this handle refers to the object at `ptr`.
    #[must_use]
    pub fn points_to<T: ?Sized>(&self, ptr: *const T) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), ptr)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl Deref for BrokerHandle {
    type Target = dyn Broker;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for BrokerHandle {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl Eq for BrokerHandle {}

impl Hash for BrokerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for BrokerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BrokerHandle")
            .field(&self.addr())
            .field(&self.0)
            .finish()
    }
}

impl fmt::Display for BrokerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "broker@{:p}", self.addr())
    }
}

impl<B: Broker + 'static> From<Arc<B>> for BrokerHandle {
    fn from(broker: Arc<B>) -> Self {
        Self(broker)
    }
}
