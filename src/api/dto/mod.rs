//! Data Transfer Objects for REST request/response serialization.
//!
//! Request bodies follow the Open Service Broker wire shape. Responses
//! reuse the domain response types, which already serialize to that shape.

pub mod binding_dto;
pub mod common_dto;
pub mod instance_dto;

pub use binding_dto::*;
pub use common_dto::*;
pub use instance_dto::*;
