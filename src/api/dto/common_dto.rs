//! Shared DTO types used across multiple endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `service_id` and `plan_id` query parameters on DELETE routes.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteParams {
    /// Service the resource belongs to; used for routing. A missing id
    /// reaches the broker as a routing miss.
    #[serde(default)]
    pub service_id: Option<String>,
    /// Plan the resource belongs to.
    pub plan_id: String,
    /// Whether the caller can poll for an asynchronous result.
    #[serde(default)]
    pub accepts_incomplete: bool,
}

/// `accepts_incomplete` query parameter on mutating instance routes.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AcceptsIncompleteParams {
    /// Whether the caller can poll for an asynchronous result.
    #[serde(default)]
    pub accepts_incomplete: bool,
}

/// Snapshot of the root composite returned by `GET /admin/brokers`.
#[derive(Debug, Clone, Serialize)]
pub struct BrokersResponse {
    /// Member broker identities.
    pub brokers: Vec<String>,
    /// Service id to owning member, as of the last catalog aggregation.
    pub routes: BTreeMap<String, String>,
    /// Whether member catalogs are fetched concurrently.
    pub parallel_service_discovery: bool,
}
