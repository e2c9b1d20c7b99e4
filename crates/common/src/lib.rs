//! Shared types for the load balancer orchestrator.

pub mod error_code;
pub mod types;

pub use error_code::ErrorCode;
pub use types::{AggregateId, ResourceId};
