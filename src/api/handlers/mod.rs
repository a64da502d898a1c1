//! REST endpoint handlers organized by resource.

pub mod bindings;
pub mod catalog;
pub mod instances;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes all broker routes under `/v2`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(catalog::routes())
        .merge(instances::routes())
        .merge(bindings::routes())
}
