//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Member brokers are described by JSON
//! catalog files listed in `BROKER_CATALOG_PATHS`; each file becomes one
//! [`InMemoryBroker`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::domain::{
    BrokerHandle, Catalog, DEFAULT_DISCOVERY_CONCURRENCY, DiscoveryConfig, InMemoryBroker,
};

/// Log line format for the binary's subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Fetch member catalogs concurrently.
    pub parallel_service_discovery: bool,

    /// Upper bound on concurrent member catalog fetches. Never below 1.
    pub discovery_concurrency: usize,

    /// JSON catalog files, one member broker per file.
    pub catalog_paths: Vec<PathBuf>,

    /// Polls an in-memory asynchronous operation stays `in progress`.
    /// Zero makes member brokers synchronous.
    pub async_poll_count: u32,

    /// Log line format.
    pub log_format: LogFormat,
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let raw_addr = lookup("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let listen_addr: SocketAddr = raw_addr
            .parse()
            .with_context(|| format!("invalid LISTEN_ADDR {raw_addr:?}"))?;

        let parallel_service_discovery =
            parse_env_bool(&lookup, "PARALLEL_SERVICE_DISCOVERY", false);
        let discovery_concurrency: usize =
            parse_env(&lookup, "DISCOVERY_CONCURRENCY", DEFAULT_DISCOVERY_CONCURRENCY).max(1);
        let catalog_paths = lookup("BROKER_CATALOG_PATHS")
            .map(|raw| parse_paths(&raw))
            .unwrap_or_default();
        let async_poll_count = parse_env(&lookup, "ASYNC_POLL_COUNT", 0);
        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json" | "JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            listen_addr,
            parallel_service_discovery,
            discovery_concurrency,
            catalog_paths,
            async_poll_count,
            log_format,
        })
    }

    /// Discovery settings for the root composite.
    #[must_use]
    pub const fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            parallel: self.parallel_service_discovery,
            concurrency: self.discovery_concurrency,
        }
    }

    /// Builds one in-memory member broker per configured catalog file.
    ///
    /// # Errors
    ///
    /// Returns an error naming the file if any catalog cannot be read,
    /// parsed or validated.
    pub fn member_brokers(&self) -> anyhow::Result<Vec<BrokerHandle>> {
        self.catalog_paths
            .iter()
            .map(|path| {
                let catalog = load_catalog(path)?;
                tracing::info!(path = %path.display(), services = catalog.len(), "catalog loaded");
                Ok(BrokerHandle::new(
                    InMemoryBroker::new(catalog).with_async_polls(self.async_poll_count),
                ))
            })
            .collect()
    }
}

/// Reads and validates a JSON catalog file.
///
/// # Errors
///
/// Returns an error if the file is unreadable, is not a catalog document,
/// or fails [`Catalog::validate`].
pub fn load_catalog(path: &Path) -> anyhow::Result<Catalog> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;
    let catalog: Catalog = serde_json::from_str(&raw)
        .with_context(|| format!("parsing catalog {}", path.display()))?;
    catalog
        .validate()
        .with_context(|| format!("validating catalog {}", path.display()))?;
    Ok(catalog)
}

fn parse_paths(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a variable as a boolean. Accepts `"true"`, `"1"`, `"false"`,
/// `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
