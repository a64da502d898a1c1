//! Catalog-driven leaf broker keeping instances and bindings in memory.
//!
//! [`InMemoryBroker`] serves a fixed [`Catalog`] and records provisioned
//! instances and bindings in process memory. Nothing survives a restart.
//! With a non-zero poll count it becomes asynchronous-only: every instance
//! mutation returns an operation id that reports `in progress` for that
//! many polls before succeeding.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::broker::Broker;
use super::catalog::{Catalog, JsonObject};
use super::command::{
    DeleteBindingCommand, DeleteBindingResponse, DeleteServiceInstanceCommand,
    DeleteServiceInstanceResponse, ProvisionBindingCommand, ProvisionBindingResponse,
    ProvisionServiceInstanceCommand, ProvisionServiceInstanceResponse,
    UpdateServiceInstanceCommand, UpdateServiceInstanceResponse,
};
use super::query::{LastOperation, LastOperationQuery, LastOperationState};
use crate::error::BrokerError;

/// A provisioned instance.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    /// Service the instance belongs to.
    pub service_id: String,
    /// Current plan.
    pub plan_id: String,
    /// Parameters from the latest provision or update.
    pub parameters: JsonObject,
    /// Provisioning timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the latest update.
    pub updated_at: DateTime<Utc>,
    operation: Option<PendingOperation>,
}

#[derive(Debug, Clone)]
struct PendingOperation {
    id: String,
    kind: OperationKind,
    polls_remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Provision,
    Update,
    Deprovision,
}

impl OperationKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Provision => "provisioning",
            Self::Update => "update",
            Self::Deprovision => "deprovisioning",
        }
    }
}

#[derive(Debug, Clone)]
struct BindingRecord {
    instance_id: String,
    credentials: JsonObject,
}

/// Leaf broker backed by in-process maps.
#[derive(Debug)]
pub struct InMemoryBroker {
    catalog: Catalog,
    async_polls: u32,
    instances: RwLock<HashMap<String, InstanceRecord>>,
    bindings: RwLock<HashMap<String, BindingRecord>>,
}

impl InMemoryBroker {
    /// Creates a synchronous broker serving `catalog`.
    #[must_use]
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            async_polls: 0,
            instances: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Makes every instance mutation asynchronous, staying `in progress`
    /// for `polls` last-operation polls. Zero keeps the broker synchronous.
    #[must_use]
    pub const fn with_async_polls(mut self, polls: u32) -> Self {
        self.async_polls = polls;
        self
    }

    /// Returns a copy of the named instance, if provisioned.
    pub async fn instance(&self, instance_id: &str) -> Option<InstanceRecord> {
        self.instances.read().await.get(instance_id).cloned()
    }

    /// Returns the number of provisioned instances, including ones still
    /// being provisioned or deprovisioned.
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Returns the number of live bindings.
    pub async fn binding_count(&self) -> usize {
        self.bindings.read().await.len()
    }

    fn ensure_offered(&self, service_id: &str, plan_id: &str) -> Result<(), String> {
        let service = self
            .catalog
            .service(service_id)
            .ok_or_else(|| format!("service {service_id} is not offered"))?;
        if service.plan(plan_id).is_none() {
            return Err(format!("plan {plan_id} is not part of service {service_id}"));
        }
        Ok(())
    }

    /// Drops every binding of `instance_id`. Callers hold the instances
    /// write lock.
    async fn purge_bindings(&self, instance_id: &str) {
        self.bindings
            .write()
            .await
            .retain(|_, binding| binding.instance_id != instance_id);
    }

    /// Starts an operation when the broker is asynchronous. Returns the
    /// operation id, or `None` for synchronous completion.
    fn begin_operation(
        &self,
        record: &mut InstanceRecord,
        kind: OperationKind,
        accepts_incomplete: bool,
    ) -> Result<Option<String>, BrokerError> {
        if self.async_polls == 0 {
            return Ok(None);
        }
        if !accepts_incomplete {
            return Err(BrokerError::AsyncRequired(record.service_id.clone()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        record.operation = Some(PendingOperation {
            id: id.clone(),
            kind,
            polls_remaining: self.async_polls,
        });
        Ok(Some(id))
    }
}

/// Fails if an asynchronous operation on the instance has not finished.
fn ensure_idle(record: &InstanceRecord, instance_id: &str) -> Result<(), BrokerError> {
    match &record.operation {
        Some(pending) => Err(BrokerError::OperationInProgress(format!(
            "{} of instance {instance_id}",
            pending.kind.label()
        ))),
        None => Ok(()),
    }
}

fn required<'a>(value: Option<&'a String>, what: &str) -> Result<&'a str, BrokerError> {
    value
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BrokerError::InvalidArgument(format!("{what} is required")))
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn catalog(&self) -> Result<Catalog, BrokerError> {
        Ok(self.catalog.clone())
    }

    async fn provision_service_instance(
        &self,
        command: &ProvisionServiceInstanceCommand,
    ) -> Result<ProvisionServiceInstanceResponse, BrokerError> {
        if let Err(reason) = self.ensure_offered(&command.service_id, &command.plan_id) {
            tracing::debug!(%reason, "rejecting provision");
            return Err(BrokerError::invalid_command(command.clone()));
        }
        let instance_id = required(command.instance_id.as_ref(), "instance id")?;

        let mut instances = self.instances.write().await;
        if instances.contains_key(instance_id) {
            return Err(BrokerError::ServiceInstanceAlreadyExists(
                instance_id.to_string(),
            ));
        }
        let now = Utc::now();
        let mut record = InstanceRecord {
            service_id: command.service_id.clone(),
            plan_id: command.plan_id.clone(),
            parameters: command.parameters.clone(),
            created_at: now,
            updated_at: now,
            operation: None,
        };
        let operation =
            self.begin_operation(&mut record, OperationKind::Provision, command.accepts_incomplete)?;
        instances.insert(instance_id.to_string(), record);

        tracing::info!(instance_id, service_id = %command.service_id, "instance provisioned");
        Ok(ProvisionServiceInstanceResponse {
            dashboard_url: None,
            operation,
        })
    }

    async fn update_service_instance(
        &self,
        command: &UpdateServiceInstanceCommand,
    ) -> Result<UpdateServiceInstanceResponse, BrokerError> {
        if let Err(reason) = self.ensure_offered(&command.service_id, &command.plan_id) {
            tracing::debug!(%reason, "rejecting update");
            return Err(BrokerError::invalid_command(command.clone()));
        }
        let instance_id = required(command.instance_id.as_ref(), "instance id")?;

        let mut instances = self.instances.write().await;
        let record = instances
            .get_mut(instance_id)
            .ok_or_else(|| BrokerError::ServiceInstanceNotFound(instance_id.to_string()))?;
        ensure_idle(record, instance_id)?;

        let plan_changes = record.plan_id != command.plan_id;
        let plan_updateable = self
            .catalog
            .service(&command.service_id)
            .is_some_and(|s| s.plan_updateable);
        if plan_changes && !plan_updateable {
            return Err(BrokerError::InvalidArgument(format!(
                "service {} does not allow plan changes",
                command.service_id
            )));
        }

        let operation =
            self.begin_operation(record, OperationKind::Update, command.accepts_incomplete)?;
        record.plan_id.clone_from(&command.plan_id);
        record.parameters.extend(command.parameters.clone());
        record.updated_at = Utc::now();

        Ok(UpdateServiceInstanceResponse { operation })
    }

    async fn delete_service_instance(
        &self,
        command: &DeleteServiceInstanceCommand,
    ) -> Result<DeleteServiceInstanceResponse, BrokerError> {
        let instance_id = required(command.instance_id.as_ref(), "instance id")?;

        let mut instances = self.instances.write().await;
        let Some(record) = instances.get_mut(instance_id) else {
            return Err(BrokerError::ServiceInstanceNotFound(instance_id.to_string()));
        };
        ensure_idle(record, instance_id)?;
        let operation =
            self.begin_operation(record, OperationKind::Deprovision, command.accepts_incomplete)?;
        if operation.is_some() {
            tracing::info!(instance_id, "instance deprovisioning started");
            return Ok(DeleteServiceInstanceResponse { operation });
        }
        instances.remove(instance_id);
        self.purge_bindings(instance_id).await;
        drop(instances);

        tracing::info!(instance_id, "instance deprovisioned");
        Ok(DeleteServiceInstanceResponse { operation })
    }

    async fn provision_binding(
        &self,
        command: &ProvisionBindingCommand,
    ) -> Result<ProvisionBindingResponse, BrokerError> {
        let bindable = self
            .catalog
            .service(&command.service_id)
            .and_then(|s| s.is_plan_bindable(&command.plan_id));
        if bindable != Some(true) {
            return Err(BrokerError::invalid_command(command.clone()));
        }
        let binding_id = required(command.binding_id.as_ref(), "binding id")?;
        let instance_id = required(command.instance_id.as_ref(), "instance id")?;

        // Held until the binding is recorded so a deprovision cannot start
        // in between. Lock order is instances, then bindings.
        let instances = self.instances.read().await;
        let Some(record) = instances.get(instance_id) else {
            return Err(BrokerError::ServiceInstanceNotFound(instance_id.to_string()));
        };
        ensure_idle(record, instance_id)?;

        let mut bindings = self.bindings.write().await;
        if bindings.contains_key(binding_id) {
            return Err(BrokerError::BindingAlreadyExists(binding_id.to_string()));
        }
        let mut credentials = JsonObject::new();
        credentials.insert("instance_id".to_string(), instance_id.into());
        credentials.insert("binding_id".to_string(), binding_id.into());
        credentials.insert(
            "password".to_string(),
            uuid::Uuid::new_v4().simple().to_string().into(),
        );
        bindings.insert(
            binding_id.to_string(),
            BindingRecord {
                instance_id: instance_id.to_string(),
                credentials: credentials.clone(),
            },
        );
        drop(bindings);
        drop(instances);

        tracing::info!(binding_id, instance_id, "binding created");
        Ok(ProvisionBindingResponse {
            credentials,
            ..ProvisionBindingResponse::default()
        })
    }

    async fn delete_binding(
        &self,
        command: &DeleteBindingCommand,
    ) -> Result<DeleteBindingResponse, BrokerError> {
        let binding_id = required(command.binding_id.as_ref(), "binding id")?;
        let removed = self.bindings.write().await.remove(binding_id);
        match removed {
            Some(binding) => {
                tracing::info!(binding_id, instance_id = %binding.instance_id, "binding deleted");
                Ok(DeleteBindingResponse {})
            }
            None => Err(BrokerError::BindingNotFound(binding_id.to_string())),
        }
    }

    async fn last_operation(&self, query: &LastOperationQuery) -> Result<LastOperation, BrokerError> {
        let instance_id = required(query.instance_id.as_ref(), "instance id")?;

        let mut instances = self.instances.write().await;
        let Some(record) = instances.get_mut(instance_id) else {
            return Err(BrokerError::ServiceInstanceNotFound(instance_id.to_string()));
        };
        let Some(pending) = record.operation.as_mut() else {
            return Ok(LastOperation::new(LastOperationState::Succeeded));
        };
        if query
            .operation
            .as_deref()
            .is_some_and(|operation| operation != pending.id)
        {
            return Err(BrokerError::InvalidArgument(format!(
                "unknown operation for instance {instance_id}"
            )));
        }

        if pending.polls_remaining > 0 {
            pending.polls_remaining -= 1;
            return Ok(LastOperation::new(LastOperationState::InProgress)
                .with_description(format!("{} in progress", pending.kind.label())));
        }

        let kind = pending.kind;
        record.operation = None;
        if kind == OperationKind::Deprovision {
            instances.remove(instance_id);
            self.purge_bindings(instance_id).await;
            tracing::info!(instance_id, "instance deprovisioned");
        }
        Ok(LastOperation::new(LastOperationState::Succeeded)
            .with_description(format!("{} complete", kind.label())))
    }

    async fn is_supported_service_id(&self, service_id: &str) -> Result<bool, BrokerError> {
        Ok(self.catalog.contains(service_id))
    }

    async fn is_supported_plan_id(
        &self,
        service_id: &str,
        plan_id: &str,
    ) -> Result<bool, BrokerError> {
        Ok(self
            .catalog
            .service(service_id)
            .is_some_and(|s| s.plan(plan_id).is_some()))
    }

    async fn is_plan_bindable(&self, service_id: &str, plan_id: &str) -> Result<bool, BrokerError> {
        Ok(self
            .catalog
            .service(service_id)
            .and_then(|s| s.is_plan_bindable(plan_id))
            .unwrap_or(false))
    }

    fn is_asynchronous_only(&self) -> bool {
        self.async_polls > 0
    }
}
