//! A broker that multiplexes a mutable set of child brokers.
//!
//! [`CompositeBroker`] merges the catalogs of its members into one catalog
//! and routes every command and last-operation query to the member that
//! reported the named service during the most recent catalog aggregation.
//!
//! # Locking
//!
//! Two independent [`tokio::sync::RwLock`]s guard the state:
//!
//! - `brokers`: the membership set.
//! - `routes`: the routing table, service id to owning member.
//!
//! When both are needed they are acquired in that order, membership first.
//! Broker removal holds the membership write lock while it purges routes.
//! Catalog aggregation snapshots membership under a read lock and keeps it
//! until the routing write lock is held, so a removal either happens before
//! the snapshot or purges the rebuilt table afterwards. The routing write
//! lock is then held for the whole fetch so rebuilds are serialized.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::RwLock;

use super::broker::{Broker, BrokerHandle};
use super::catalog::{Catalog, Service};
use super::command::{
    DeleteBindingCommand, DeleteBindingResponse, DeleteServiceInstanceCommand,
    DeleteServiceInstanceResponse, ProvisionBindingCommand, ProvisionBindingResponse,
    ProvisionServiceInstanceCommand, ProvisionServiceInstanceResponse,
    UpdateServiceInstanceCommand, UpdateServiceInstanceResponse,
};
use super::query::{LastOperation, LastOperationQuery};
use crate::error::BrokerError;

/// Default bound on concurrent member catalog fetches.
pub const DEFAULT_DISCOVERY_CONCURRENCY: usize = 8;

/// How member catalogs are fetched during aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Fetch member catalogs concurrently instead of one after another.
    pub parallel: bool,
    /// Maximum number of in-flight fetches when `parallel` is set.
    pub concurrency: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            concurrency: DEFAULT_DISCOVERY_CONCURRENCY,
        }
    }
}

/// Broker façade over a dynamic set of member brokers.
///
/// # Concurrency
///
/// - Membership changes are serialized with each other.
/// - Catalog aggregations are serialized with each other and with
///   routing-table purges on removal.
/// - Command routing takes only a read lock on the routing table and
///   releases it before delegating, so slow members do not block lookups.
///
/// Duplicate service ids across members resolve to whichever member's
/// catalog was recorded last. That order is unspecified and, with
/// parallel discovery, depends on fetch completion; do not rely on it.
#[derive(Debug)]
pub struct CompositeBroker {
    brokers: RwLock<HashSet<BrokerHandle>>,
    routes: RwLock<HashMap<String, BrokerHandle>>,
    parallel: AtomicBool,
    concurrency: usize,
}

impl CompositeBroker {
    /// Creates an empty composite with sequential discovery.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DiscoveryConfig::default())
    }

    /// Creates an empty composite with the given discovery settings.
    #[must_use]
    pub fn with_config(config: DiscoveryConfig) -> Self {
        Self {
            brokers: RwLock::new(HashSet::new()),
            routes: RwLock::new(HashMap::new()),
            parallel: AtomicBool::new(config.parallel),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Creates a composite whose membership starts as `brokers`.
    ///
    /// Repeated handles collapse into one member. The composite does not
    /// exist yet, so none of them can be the composite itself.
    #[must_use]
    pub fn with_brokers(
        brokers: impl IntoIterator<Item = BrokerHandle>,
        config: DiscoveryConfig,
    ) -> Self {
        let mut composite = Self::with_config(config);
        // Nothing else can reach the lock yet.
        let members = composite.brokers.get_mut();
        for broker in brokers {
            if members.insert(broker.clone()) {
                tracing::info!(%broker, "broker added");
            }
        }
        composite
    }

    /// Returns whether member catalogs are fetched concurrently.
    #[must_use]
    pub fn parallel_service_discovery(&self) -> bool {
        self.parallel.load(Ordering::Relaxed)
    }

    /// Switches concurrent member catalog fetching on or off. Takes effect
    /// at the next aggregation.
    pub fn set_parallel_service_discovery(&self, parallel: bool) {
        self.parallel.store(parallel, Ordering::Relaxed);
    }

    /// Adds a member broker.
    ///
    /// Returns `true` if the broker was not already a member.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidArgument`] if `broker` is this composite.
    pub async fn add_broker(&self, broker: BrokerHandle) -> Result<bool, BrokerError> {
        self.ensure_not_self(&broker)?;
        let added = self.brokers.write().await.insert(broker.clone());
        if added {
            tracing::info!(%broker, "broker added");
        }
        Ok(added)
    }

    /// Removes a member broker and purges every route pointing at it.
    ///
    /// Returns `true` if the broker was a member.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidArgument`] if `broker` is this composite.
    pub async fn remove_broker(&self, broker: &BrokerHandle) -> Result<bool, BrokerError> {
        self.ensure_not_self(broker)?;
        let mut brokers = self.brokers.write().await;
        let purged = {
            let mut routes = self.routes.write().await;
            let before = routes.len();
            routes.retain(|_, owner| owner != broker);
            before - routes.len()
        };
        let removed = brokers.remove(broker);
        drop(brokers);
        if removed {
            tracing::info!(%broker, purged_routes = purged, "broker removed");
        }
        Ok(removed)
    }

    /// Returns a snapshot of the current members.
    pub async fn brokers(&self) -> Vec<BrokerHandle> {
        self.brokers.read().await.iter().cloned().collect()
    }

    /// Returns `true` if `broker` is currently a member.
    pub async fn contains_broker(&self, broker: &BrokerHandle) -> bool {
        self.brokers.read().await.contains(broker)
    }

    /// Returns the number of members.
    pub async fn broker_count(&self) -> usize {
        self.brokers.read().await.len()
    }

    /// Returns the member currently responsible for `service_id`.
    pub async fn broker_for_service(&self, service_id: &str) -> Option<BrokerHandle> {
        self.route(Some(service_id)).await
    }

    /// Returns a snapshot of the routing table.
    pub async fn routing_table(&self) -> HashMap<String, BrokerHandle> {
        self.routes.read().await.clone()
    }

    fn ensure_not_self(&self, broker: &BrokerHandle) -> Result<(), BrokerError> {
        if broker.points_to(std::ptr::from_ref(self)) {
            return Err(BrokerError::InvalidArgument(
                "a composite broker cannot contain itself".to_string(),
            ));
        }
        Ok(())
    }

    async fn route(&self, service_id: Option<&str>) -> Option<BrokerHandle> {
        let service_id = service_id.filter(|id| !id.is_empty())?;
        let routes = self.routes.read().await;
        routes.get(service_id).cloned()
    }

    async fn fetch_catalogs(
        &self,
        members: Vec<BrokerHandle>,
    ) -> Result<Vec<(BrokerHandle, Catalog)>, BrokerError> {
        if self.parallel_service_discovery() {
            stream::iter(members)
                .map(|broker| async move {
                    let catalog = broker.catalog().await?;
                    Ok::<_, BrokerError>((broker, catalog))
                })
                .buffer_unordered(self.concurrency)
                .try_collect()
                .await
        } else {
            let mut fetched = Vec::with_capacity(members.len());
            for broker in members {
                let catalog = broker.catalog().await?;
                fetched.push((broker, catalog));
            }
            Ok(fetched)
        }
    }
}

impl Default for CompositeBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for CompositeBroker {
    /// Returns the union of all member catalogs and replaces the routing
    /// table with the associations observed by this call.
    ///
    /// If any member fails, the call fails with that member's error and
    /// the routing table keeps its previous contents.
    async fn catalog(&self) -> Result<Catalog, BrokerError> {
        let membership = self.brokers.read().await;
        let members: Vec<BrokerHandle> = membership.iter().cloned().collect();
        if members.is_empty() {
            return Ok(Catalog::empty());
        }
        let member_count = members.len();

        let mut routes = self.routes.write().await;
        drop(membership);
        let fetched = self.fetch_catalogs(members).await.inspect_err(|err| {
            tracing::warn!(error = %err, "member catalog fetch failed; routing table unchanged");
        })?;

        let mut associations: HashMap<String, (Service, BrokerHandle)> = HashMap::new();
        for (broker, catalog) in fetched {
            for service in catalog.services() {
                associations.insert(service.id.clone(), (service.clone(), broker.clone()));
            }
        }

        let mut rebuilt = HashMap::with_capacity(associations.len());
        let mut services = Vec::with_capacity(associations.len());
        for (service_id, (service, broker)) in associations {
            rebuilt.insert(service_id, broker);
            services.push(service);
        }
        *routes = rebuilt;
        drop(routes);

        tracing::info!(
            service_count = services.len(),
            broker_count = member_count,
            "catalog aggregated"
        );
        Ok(Catalog::new(services))
    }

    async fn provision_service_instance(
        &self,
        command: &ProvisionServiceInstanceCommand,
    ) -> Result<ProvisionServiceInstanceResponse, BrokerError> {
        let Some(broker) = self.route(Some(&command.service_id)).await else {
            tracing::warn!(service_id = %command.service_id, "no broker for provision");
            return Err(BrokerError::invalid_command(command.clone()));
        };
        broker.provision_service_instance(command).await
    }

    async fn update_service_instance(
        &self,
        command: &UpdateServiceInstanceCommand,
    ) -> Result<UpdateServiceInstanceResponse, BrokerError> {
        let Some(broker) = self.route(Some(&command.service_id)).await else {
            tracing::warn!(service_id = %command.service_id, "no broker for update");
            return Err(BrokerError::invalid_command(command.clone()));
        };
        broker.update_service_instance(command).await
    }

    async fn delete_service_instance(
        &self,
        command: &DeleteServiceInstanceCommand,
    ) -> Result<DeleteServiceInstanceResponse, BrokerError> {
        let Some(broker) = self.route(Some(&command.service_id)).await else {
            tracing::warn!(service_id = %command.service_id, "no broker for deprovision");
            return Err(BrokerError::invalid_command(command.clone()));
        };
        broker.delete_service_instance(command).await
    }

    async fn provision_binding(
        &self,
        command: &ProvisionBindingCommand,
    ) -> Result<ProvisionBindingResponse, BrokerError> {
        let Some(broker) = self.route(Some(&command.service_id)).await else {
            tracing::warn!(service_id = %command.service_id, "no broker for bind");
            return Err(BrokerError::invalid_command(command.clone()));
        };
        broker.provision_binding(command).await
    }

    async fn delete_binding(
        &self,
        command: &DeleteBindingCommand,
    ) -> Result<DeleteBindingResponse, BrokerError> {
        let Some(broker) = self.route(Some(&command.service_id)).await else {
            tracing::warn!(service_id = %command.service_id, "no broker for unbind");
            return Err(BrokerError::invalid_command(command.clone()));
        };
        broker.delete_binding(command).await
    }

    async fn last_operation(&self, query: &LastOperationQuery) -> Result<LastOperation, BrokerError> {
        let Some(broker) = self.route(query.service_id.as_deref()).await else {
            tracing::warn!(service_id = ?query.service_id, "no broker for last operation");
            return Err(BrokerError::invalid_query(query.clone()));
        };
        broker.last_operation(query).await
    }

    async fn is_supported_service_id(&self, service_id: &str) -> Result<bool, BrokerError> {
        Ok(self.route(Some(service_id)).await.is_some())
    }

    async fn is_supported_plan_id(
        &self,
        service_id: &str,
        plan_id: &str,
    ) -> Result<bool, BrokerError> {
        match self.route(Some(service_id)).await {
            Some(broker) => broker.is_supported_plan_id(service_id, plan_id).await,
            None => Ok(false),
        }
    }

    async fn is_plan_bindable(&self, service_id: &str, plan_id: &str) -> Result<bool, BrokerError> {
        match self.route(Some(service_id)).await {
            Some(broker) => broker.is_plan_bindable(service_id, plan_id).await,
            None => Ok(false),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    use super::*;
    use crate::domain::catalog::Plan;
    use crate::domain::memory_broker::InMemoryBroker;
    use crate::domain::query::LastOperationState;

    fn service(id: &str) -> Service {
        let Ok(service) = Service::builder(id, id, format!("{id} service"))
            .bindable(true)
            .plan(Plan::new(format!("{id}-plan"), "default", "default plan"))
            .build()
        else {
            panic!("valid service");
        };
        service
    }

    fn catalog(ids: &[&str]) -> Catalog {
        Catalog::new(ids.iter().map(|id| service(id)))
    }

    fn memory_broker(ids: &[&str]) -> BrokerHandle {
        BrokerHandle::new(InMemoryBroker::new(catalog(ids)))
    }

    fn ids(catalog: &Catalog) -> BTreeSet<String> {
        catalog.services().iter().map(|s| s.id.clone()).collect()
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| (*id).to_string()).collect()
    }

    /// Member whose catalog can be swapped, made to fail, or slowed down,
    /// and which counts every call it receives.
    #[derive(Debug, Default)]
    struct ScriptedBroker {
        catalog: std::sync::Mutex<Catalog>,
        fail: AtomicBool,
        delay_ms: u64,
        catalog_calls: AtomicUsize,
        command_calls: AtomicUsize,
    }

    impl ScriptedBroker {
        fn with_services(ids: &[&str]) -> Self {
            Self {
                catalog: std::sync::Mutex::new(catalog(ids)),
                ..Self::default()
            }
        }

        fn set_services(&self, ids: &[&str]) {
            if let Ok(mut current) = self.catalog.lock() {
                *current = catalog(ids);
            }
        }
    }

    #[async_trait]
    impl Broker for ScriptedBroker {
        async fn catalog(&self) -> Result<Catalog, BrokerError> {
            self.catalog_calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(BrokerError::Backend("catalog source unavailable".to_string()));
            }
            self.catalog
                .lock()
                .map(|c| c.clone())
                .map_err(|_| BrokerError::Internal("poisoned".to_string()))
        }

        async fn provision_service_instance(
            &self,
            _command: &ProvisionServiceInstanceCommand,
        ) -> Result<ProvisionServiceInstanceResponse, BrokerError> {
            self.command_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(BrokerError::Backend("provisioner down".to_string()));
            }
            Ok(ProvisionServiceInstanceResponse {
                dashboard_url: Some("https://dashboard.example".to_string()),
                operation: None,
            })
        }

        async fn update_service_instance(
            &self,
            _command: &UpdateServiceInstanceCommand,
        ) -> Result<UpdateServiceInstanceResponse, BrokerError> {
            self.command_calls.fetch_add(1, Ordering::SeqCst);
            Ok(UpdateServiceInstanceResponse::default())
        }

        async fn delete_service_instance(
            &self,
            _command: &DeleteServiceInstanceCommand,
        ) -> Result<DeleteServiceInstanceResponse, BrokerError> {
            self.command_calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeleteServiceInstanceResponse::default())
        }

        async fn provision_binding(
            &self,
            _command: &ProvisionBindingCommand,
        ) -> Result<ProvisionBindingResponse, BrokerError> {
            self.command_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProvisionBindingResponse::default())
        }

        async fn delete_binding(
            &self,
            _command: &DeleteBindingCommand,
        ) -> Result<DeleteBindingResponse, BrokerError> {
            self.command_calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeleteBindingResponse::default())
        }

        async fn is_plan_bindable(
            &self,
            _service_id: &str,
            _plan_id: &str,
        ) -> Result<bool, BrokerError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn add_is_idempotent_and_remove_reports_presence() {
        let composite = CompositeBroker::new();
        let a = memory_broker(&["s1"]);
        let b = memory_broker(&["s2"]);

        assert!(matches!(composite.add_broker(a.clone()).await, Ok(true)));
        assert!(matches!(composite.add_broker(a.clone()).await, Ok(false)));
        assert!(matches!(composite.add_broker(b.clone()).await, Ok(true)));
        assert_eq!(composite.broker_count().await, 2);

        assert!(matches!(composite.remove_broker(&a).await, Ok(true)));
        assert!(matches!(composite.remove_broker(&a).await, Ok(false)));
        assert!(!composite.contains_broker(&a).await);
        assert!(composite.contains_broker(&b).await);
        assert_eq!(composite.brokers().await, vec![b]);
    }

    #[tokio::test]
    async fn membership_follows_set_semantics() {
        let composite = CompositeBroker::new();
        let candidates: Vec<BrokerHandle> = (0..4).map(|_| memory_broker(&[])).collect();
        let mut expected: HashSet<BrokerHandle> = HashSet::new();

        // (index, add?) sequence with re-adds and removals of non-members
        let script = [
            (0, true),
            (1, true),
            (0, true),
            (2, false),
            (1, false),
            (3, true),
            (1, false),
            (2, true),
        ];
        for (index, add) in script {
            let Some(broker) = candidates.get(index) else {
                panic!("index out of range");
            };
            if add {
                let Ok(changed) = composite.add_broker(broker.clone()).await else {
                    panic!("add failed");
                };
                assert_eq!(changed, expected.insert(broker.clone()));
            } else {
                let Ok(changed) = composite.remove_broker(broker).await else {
                    panic!("remove failed");
                };
                assert_eq!(changed, expected.remove(broker));
            }
        }

        let actual: HashSet<BrokerHandle> = composite.brokers().await.into_iter().collect();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn composite_cannot_contain_itself() {
        let composite = Arc::new(CompositeBroker::new());
        let member = memory_broker(&["s1"]);
        let _ = composite.add_broker(member).await;
        let itself = BrokerHandle::from(Arc::clone(&composite));

        let added = composite.add_broker(itself.clone()).await;
        assert!(matches!(added, Err(BrokerError::InvalidArgument(_))));
        let removed = composite.remove_broker(&itself).await;
        assert!(matches!(removed, Err(BrokerError::InvalidArgument(_))));
        assert_eq!(composite.broker_count().await, 1);
    }

    #[tokio::test]
    async fn brokers_returns_a_detached_snapshot() {
        let composite = CompositeBroker::new();
        let _ = composite.add_broker(memory_broker(&["s1"])).await;

        let mut snapshot = composite.brokers().await;
        snapshot.clear();
        assert_eq!(composite.broker_count().await, 1);
    }

    #[tokio::test]
    async fn empty_membership_yields_empty_catalog() {
        let composite = CompositeBroker::new();
        let Ok(catalog) = composite.catalog().await else {
            panic!("empty aggregation must succeed");
        };
        assert!(catalog.is_empty());
        assert!(composite.routing_table().await.is_empty());
    }

    #[tokio::test]
    async fn catalog_is_union_and_routes_one_entry_per_service() {
        let a = memory_broker(&["s1", "s2"]);
        let b = memory_broker(&["s3"]);
        let composite =
            CompositeBroker::with_brokers([a.clone(), b.clone()], DiscoveryConfig::default());

        let Ok(catalog) = composite.catalog().await else {
            panic!("aggregation failed");
        };
        assert_eq!(ids(&catalog), set(&["s1", "s2", "s3"]));

        let table = composite.routing_table().await;
        assert_eq!(table.len(), catalog.len());
        assert_eq!(table.get("s1"), Some(&a));
        assert_eq!(table.get("s2"), Some(&a));
        assert_eq!(table.get("s3"), Some(&b));
    }

    #[tokio::test]
    async fn duplicate_service_id_routes_to_one_reporting_member() {
        let a = memory_broker(&["shared", "only-a"]);
        let b = memory_broker(&["shared"]);
        let composite =
            CompositeBroker::with_brokers([a.clone(), b.clone()], DiscoveryConfig::default());

        let Ok(catalog) = composite.catalog().await else {
            panic!("aggregation failed");
        };
        assert_eq!(catalog.len(), 2);
        let Some(owner) = composite.broker_for_service("shared").await else {
            panic!("shared service must be routed");
        };
        assert!(owner == a || owner == b);
    }

    #[tokio::test]
    async fn dispatch_routes_by_service_id() {
        let a = Arc::new(ScriptedBroker::with_services(&["s1"]));
        let b = Arc::new(ScriptedBroker::with_services(&["s2"]));
        let composite = CompositeBroker::with_brokers(
            [
                BrokerHandle::from(Arc::clone(&a)),
                BrokerHandle::from(Arc::clone(&b)),
            ],
            DiscoveryConfig::default(),
        );
        let Ok(catalog) = composite.catalog().await else {
            panic!("aggregation failed");
        };
        assert_eq!(ids(&catalog), set(&["s1", "s2"]));

        let to_a = ProvisionServiceInstanceCommand::new("i1", "s1", "s1-plan", "org", "space");
        assert!(composite.provision_service_instance(&to_a).await.is_ok());
        assert_eq!(a.command_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.command_calls.load(Ordering::SeqCst), 0);

        let to_b = DeleteBindingCommand::new("b1", "i2", "s2", "s2-plan");
        assert!(composite.delete_binding(&to_b).await.is_ok());
        let to_b = UpdateServiceInstanceCommand::new("i2", "s2", "s2-plan");
        assert!(composite.update_service_instance(&to_b).await.is_ok());
        assert_eq!(a.command_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.command_calls.load(Ordering::SeqCst), 2);

        let unknown = ProvisionServiceInstanceCommand::new("i3", "s3", "p", "org", "space");
        let result = composite.provision_service_instance(&unknown).await;
        let Err(err) = result else {
            panic!("unknown service must be rejected");
        };
        let Some(rejected) = err.command() else {
            panic!("expected invalid command, got {err}");
        };
        assert_eq!(rejected.service_id(), "s3");
        assert_eq!(
            a.command_calls.load(Ordering::SeqCst) + b.command_calls.load(Ordering::SeqCst),
            3
        );
    }

    #[tokio::test]
    async fn commands_before_first_aggregation_are_rejected() {
        let composite = CompositeBroker::new();
        let _ = composite.add_broker(memory_broker(&["s1"])).await;

        let cmd = DeleteServiceInstanceCommand::new("i1", "s1", "s1-plan");
        let result = composite.delete_service_instance(&cmd).await;
        assert!(matches!(result, Err(BrokerError::InvalidCommand(_))));
    }

    #[tokio::test]
    async fn empty_service_id_is_a_routing_miss() {
        let composite =
            CompositeBroker::with_brokers([memory_broker(&["s1"])], DiscoveryConfig::default());
        let _ = composite.catalog().await;

        let cmd = ProvisionBindingCommand::new("b1", "i1", "", "p");
        let result = composite.provision_binding(&cmd).await;
        assert!(matches!(result, Err(BrokerError::InvalidCommand(_))));

        let query = LastOperationQuery::default();
        let result = composite.last_operation(&query).await;
        let Err(err) = result else {
            panic!("missing service id must be rejected");
        };
        assert_eq!(err.query(), Some(&query));
    }

    #[tokio::test]
    async fn member_errors_propagate_unchanged() {
        let a = Arc::new(ScriptedBroker::with_services(&["s1"]));
        let composite = CompositeBroker::with_brokers(
            [BrokerHandle::from(Arc::clone(&a))],
            DiscoveryConfig::default(),
        );
        let _ = composite.catalog().await;
        a.fail.store(true, Ordering::SeqCst);

        let cmd = ProvisionServiceInstanceCommand::new("i1", "s1", "s1-plan", "org", "space");
        let result = composite.provision_service_instance(&cmd).await;
        let Err(BrokerError::Backend(message)) = result else {
            panic!("expected the member's backend error");
        };
        assert_eq!(message, "provisioner down");
    }

    #[tokio::test]
    async fn last_operation_is_delegated() {
        let leaf = InMemoryBroker::new(catalog(&["s1"])).with_async_polls(1);
        let composite =
            CompositeBroker::with_brokers([BrokerHandle::new(leaf)], DiscoveryConfig::default());
        let _ = composite.catalog().await;

        let cmd = ProvisionServiceInstanceCommand::new("i1", "s1", "s1-plan", "org", "space")
            .accepts_incomplete(true);
        let Ok(response) = composite.provision_service_instance(&cmd).await else {
            panic!("provision failed");
        };
        let Some(operation) = response.operation else {
            panic!("expected asynchronous provisioning");
        };

        let query = LastOperationQuery::new("s1", "i1").with_operation(operation);
        let Ok(first) = composite.last_operation(&query).await else {
            panic!("poll failed");
        };
        assert_eq!(first.state, LastOperationState::InProgress);
        let Ok(second) = composite.last_operation(&query).await else {
            panic!("poll failed");
        };
        assert_eq!(second.state, LastOperationState::Succeeded);
    }

    #[tokio::test]
    async fn removal_purges_routes_and_catalog() {
        let a = memory_broker(&["s1", "shared"]);
        let b = memory_broker(&["s2"]);
        let composite =
            CompositeBroker::with_brokers([a.clone(), b.clone()], DiscoveryConfig::default());
        let _ = composite.catalog().await;

        assert!(matches!(composite.remove_broker(&a).await, Ok(true)));
        let table = composite.routing_table().await;
        assert!(table.values().all(|owner| owner != &a));
        assert!(composite.broker_for_service("s1").await.is_none());

        let cmd = DeleteServiceInstanceCommand::new("i1", "s1", "s1-plan");
        assert!(matches!(
            composite.delete_service_instance(&cmd).await,
            Err(BrokerError::InvalidCommand(_))
        ));

        let Ok(catalog) = composite.catalog().await else {
            panic!("aggregation failed");
        };
        assert_eq!(ids(&catalog), set(&["s2"]));
    }

    #[tokio::test]
    async fn removing_last_member_leaves_empty_table() {
        let a = memory_broker(&["s1"]);
        let composite = CompositeBroker::with_brokers([a.clone()], DiscoveryConfig::default());
        let _ = composite.catalog().await;
        let _ = composite.remove_broker(&a).await;

        let Ok(catalog) = composite.catalog().await else {
            panic!("aggregation failed");
        };
        assert!(catalog.is_empty());
        assert!(composite.routing_table().await.is_empty());
    }

    #[tokio::test]
    async fn failed_member_aborts_aggregation_and_keeps_previous_table() {
        let a = Arc::new(ScriptedBroker::with_services(&["s1"]));
        let b = Arc::new(ScriptedBroker::with_services(&["s2"]));
        let a_handle = BrokerHandle::from(Arc::clone(&a));
        let composite = CompositeBroker::with_brokers(
            [a_handle.clone(), BrokerHandle::from(Arc::clone(&b))],
            DiscoveryConfig::default(),
        );
        let _ = composite.catalog().await;
        let before = composite.routing_table().await;

        a.set_services(&["s1", "s9"]);
        b.fail.store(true, Ordering::SeqCst);
        let result = composite.catalog().await;
        let Err(BrokerError::Backend(message)) = result else {
            panic!("aggregation must fail with the member's error");
        };
        assert_eq!(message, "catalog source unavailable");

        let after = composite.routing_table().await;
        assert_eq!(after, before);
        assert!(composite.broker_for_service("s9").await.is_none());
        assert_eq!(composite.broker_for_service("s1").await, Some(a_handle));

        b.fail.store(false, Ordering::SeqCst);
        let Ok(catalog) = composite.catalog().await else {
            panic!("aggregation failed");
        };
        assert_eq!(ids(&catalog), set(&["s1", "s2", "s9"]));
    }

    #[tokio::test]
    async fn repeated_aggregation_is_stable() {
        let composite = CompositeBroker::with_brokers(
            [memory_broker(&["s1", "s2"]), memory_broker(&["s3"])],
            DiscoveryConfig::default(),
        );
        let Ok(first) = composite.catalog().await else {
            panic!("aggregation failed");
        };
        let Ok(second) = composite.catalog().await else {
            panic!("aggregation failed");
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn parallel_discovery_matches_sequential() {
        let members: Vec<BrokerHandle> = (0..6)
            .map(|n| {
                let services = [format!("svc-{n}-a"), format!("svc-{n}-b")];
                let refs: Vec<&str> = services.iter().map(String::as_str).collect();
                memory_broker(&refs)
            })
            .collect();
        let composite = CompositeBroker::with_brokers(
            members,
            DiscoveryConfig {
                parallel: false,
                concurrency: 2,
            },
        );
        let Ok(sequential) = composite.catalog().await else {
            panic!("aggregation failed");
        };
        let sequential_table = composite.routing_table().await;

        composite.set_parallel_service_discovery(true);
        assert!(composite.parallel_service_discovery());
        let Ok(parallel) = composite.catalog().await else {
            panic!("aggregation failed");
        };
        assert_eq!(ids(&sequential), ids(&parallel));
        assert_eq!(parallel.len(), 12);
        assert_eq!(composite.routing_table().await, sequential_table);
    }

    #[tokio::test]
    async fn parallel_discovery_fails_fast() {
        let failing = Arc::new(ScriptedBroker::with_services(&["bad"]));
        failing.fail.store(true, Ordering::SeqCst);
        let composite = CompositeBroker::with_brokers(
            [
                memory_broker(&["s1"]),
                BrokerHandle::from(Arc::clone(&failing)),
                memory_broker(&["s2"]),
            ],
            DiscoveryConfig {
                parallel: true,
                concurrency: 4,
            },
        );
        assert!(matches!(
            composite.catalog().await,
            Err(BrokerError::Backend(_))
        ));
        assert!(composite.routing_table().await.is_empty());
    }

    #[tokio::test]
    async fn capability_queries_follow_routing() {
        let composite =
            CompositeBroker::with_brokers([memory_broker(&["s1"])], DiscoveryConfig::default());
        assert!(matches!(composite.is_supported_service_id("s1").await, Ok(false)));

        let _ = composite.catalog().await;
        assert!(matches!(composite.is_supported_service_id("s1").await, Ok(true)));
        assert!(matches!(composite.is_supported_service_id("s2").await, Ok(false)));
        assert!(matches!(composite.is_plan_bindable("s1", "s1-plan").await, Ok(true)));
        assert!(matches!(composite.is_plan_bindable("s2", "s2-plan").await, Ok(false)));
        assert!(matches!(composite.is_supported_plan_id("s1", "s1-plan").await, Ok(true)));
        assert!(matches!(composite.is_supported_plan_id("s1", "other").await, Ok(false)));
        assert!(!composite.is_asynchronous_only());
    }

    #[tokio::test]
    async fn nested_composites_route_through() {
        let inner = Arc::new(CompositeBroker::with_brokers(
            [memory_broker(&["deep"])],
            DiscoveryConfig::default(),
        ));
        let outer = CompositeBroker::with_brokers(
            [BrokerHandle::from(Arc::clone(&inner))],
            DiscoveryConfig::default(),
        );
        let Ok(catalog) = outer.catalog().await else {
            panic!("aggregation failed");
        };
        assert!(catalog.contains("deep"));

        let cmd = ProvisionServiceInstanceCommand::new("i1", "deep", "deep-plan", "org", "space");
        assert!(outer.provision_service_instance(&cmd).await.is_ok());
    }

    #[tokio::test]
    async fn initial_brokers_collapse_repeated_handles() {
        let a = memory_broker(&["s1"]);
        let b = memory_broker(&["s2"]);
        let composite = CompositeBroker::with_brokers(
            [a.clone(), b.clone(), a.clone()],
            DiscoveryConfig::default(),
        );
        assert_eq!(composite.broker_count().await, 2);
        assert!(composite.contains_broker(&a).await);
        assert!(matches!(composite.add_broker(b).await, Ok(false)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_removal_and_aggregation_never_route_to_non_members() {
        for _ in 0..200 {
            let leaving = memory_broker(&["leaving"]);
            let staying = memory_broker(&["staying"]);
            let composite = Arc::new(CompositeBroker::with_brokers(
                [leaving.clone(), staying],
                DiscoveryConfig::default(),
            ));

            let aggregating = {
                let composite = Arc::clone(&composite);
                tokio::spawn(async move { composite.catalog().await })
            };
            let removing = {
                let composite = Arc::clone(&composite);
                let leaving = leaving.clone();
                tokio::spawn(async move { composite.remove_broker(&leaving).await })
            };
            let (Ok(Ok(_)), Ok(Ok(true))) = (aggregating.await, removing.await) else {
                panic!("aggregation or removal failed");
            };

            assert!(composite.broker_for_service("leaving").await.is_none());
            let members = composite.brokers().await;
            assert!(
                composite
                    .routing_table()
                    .await
                    .values()
                    .all(|owner| members.contains(owner))
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn removal_during_slow_aggregation_leaves_no_stale_route() {
        let slow = Arc::new(ScriptedBroker {
            catalog: std::sync::Mutex::new(catalog(&["slow"])),
            delay_ms: 100,
            ..ScriptedBroker::default()
        });
        let slow_handle = BrokerHandle::from(Arc::clone(&slow));
        let composite = Arc::new(CompositeBroker::with_brokers(
            [slow_handle.clone(), memory_broker(&["fast"])],
            DiscoveryConfig::default(),
        ));

        let aggregating = {
            let composite = Arc::clone(&composite);
            tokio::spawn(async move { composite.catalog().await })
        };
        // Let the aggregation take the routing write lock first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let Ok(removed) = composite.remove_broker(&slow_handle).await else {
            panic!("remove failed");
        };
        assert!(removed);

        let Ok(Ok(catalog)) = aggregating.await else {
            panic!("aggregation failed");
        };
        assert!(catalog.contains("slow"));
        assert!(composite.broker_for_service("slow").await.is_none());
        assert!(
            composite
                .routing_table()
                .await
                .values()
                .all(|owner| owner != &slow_handle)
        );
        assert_eq!(slow.catalog_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_aggregations_and_membership_changes() {
        let composite = Arc::new(CompositeBroker::with_config(DiscoveryConfig {
            parallel: true,
            concurrency: 3,
        }));
        let stable = memory_broker(&["stable"]);
        let _ = composite.add_broker(stable.clone()).await;

        let mut tasks = Vec::new();
        for n in 0..8 {
            let composite = Arc::clone(&composite);
            tasks.push(tokio::spawn(async move {
                let id = format!("transient-{n}");
                let broker = memory_broker(&[id.as_str()]);
                let _ = composite.add_broker(broker.clone()).await;
                let _ = composite.catalog().await;
                let _ = composite.remove_broker(&broker).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }

        let Ok(catalog) = composite.catalog().await else {
            panic!("aggregation failed");
        };
        assert_eq!(ids(&catalog), set(&["stable"]));
        let table = composite.routing_table().await;
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("stable"), Some(&stable));
    }
}
