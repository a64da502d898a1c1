//! broker-gateway server entry point.
//!
//! Builds the root composite from the configured catalog files and serves
//! the broker API over HTTP.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use broker_gateway::api;
use broker_gateway::app_state::AppState;
use broker_gateway::config::{GatewayConfig, LogFormat};
use broker_gateway::domain::{Broker, CompositeBroker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = GatewayConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting broker-gateway");

    // Build domain layer
    let members = config.member_brokers()?;
    let broker = Arc::new(CompositeBroker::with_brokers(members, config.discovery()));

    // Warm the routing table so commands route before the first catalog call
    let catalog = broker
        .catalog()
        .await
        .context("initial catalog aggregation failed")?;
    tracing::info!(
        brokers = broker.broker_count().await,
        services = catalog.len(),
        "routing table ready"
    );

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(broker));

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
