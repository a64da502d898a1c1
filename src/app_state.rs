//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::CompositeBroker;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Root broker every request is dispatched through.
    pub broker: Arc<CompositeBroker>,
}

impl AppState {
    /// Wraps the root composite.
    #[must_use]
    pub const fn new(broker: Arc<CompositeBroker>) -> Self {
        Self { broker }
    }
}
