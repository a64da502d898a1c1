//! # broker-gateway
//!
//! Composite service broker: one broker façade over a dynamic set of child
//! brokers.
//!
//! The gateway merges the catalogs of its member brokers into a single
//! catalog and forwards every provisioning, update, binding and
//! last-operation request to the member that owns the request's service
//! id. Members are added and removed at runtime; the routing table is
//! rebuilt on each catalog aggregation.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── CompositeBroker (domain/)
//!     │     ├── membership set
//!     │     └── routing table: service id → member
//!     │
//!     └── Member brokers (anything implementing `Broker`)
//!           ├── InMemoryBroker
//!           └── nested CompositeBroker
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
