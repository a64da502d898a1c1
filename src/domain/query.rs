//! Last-operation polling for asynchronous broker operations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Asks a broker for the status of the last asynchronous operation on an
/// instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperationQuery {
    /// Service the instance belongs to; used for routing.
    #[serde(default)]
    pub service_id: Option<String>,
    /// Instance whose operation is polled.
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Plan the instance belongs to.
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Operation id returned by the asynchronous command, if any.
    #[serde(default)]
    pub operation: Option<String>,
}

impl LastOperationQuery {
    /// Creates a query for the given service and instance.
    #[must_use]
    pub fn new(service_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id.into()),
            instance_id: Some(instance_id.into()),
            plan_id: None,
            operation: None,
        }
    }

    /// Sets the plan id.
    #[must_use]
    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    /// Sets the operation id.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

impl fmt::Display for LastOperationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "last_operation (service {:?}, instance {:?})",
            self.service_id.as_deref().unwrap_or_default(),
            self.instance_id.as_deref().unwrap_or_default()
        )
    }
}

/// State of an asynchronous operation.
///
/// `InProgress` is the only non-terminal state; callers keep polling until
/// the broker reports `Succeeded` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LastOperationState {
    /// The operation is still running.
    #[serde(rename = "in progress")]
    InProgress,
    /// The operation completed successfully.
    #[serde(rename = "succeeded")]
    Succeeded,
    /// The operation failed.
    #[serde(rename = "failed")]
    Failed,
}

impl LastOperationState {
    /// Returns `true` for `Succeeded` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LastOperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status reported for a [`LastOperationQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperation {
    /// Current state.
    pub state: LastOperationState,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LastOperation {
    /// Creates a status without a description.
    #[must_use]
    pub const fn new(state: LastOperationState) -> Self {
        Self {
            state,
            description: None,
        }
    }

    /// Attaches a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
