//! Domain error types.

use thiserror::Error;

use crate::loadbalancer::VmNicStatus;

/// Errors raised while constructing or mutating domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Port outside `1..=65535`.
    #[error("Invalid port: {value} (must be between 1 and 65535)")]
    InvalidPort { value: i64 },

    /// Listener protocol is not supported.
    #[error("Unsupported listener protocol: {value}")]
    UnsupportedProtocol { value: String },

    /// VM NIC ref status string could not be parsed.
    #[error("Unknown VM NIC status: {value}")]
    UnknownStatus { value: String },

    /// VM NIC ref cannot move between the given states.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: VmNicStatus, to: VmNicStatus },

    /// Load balancer name must not be blank.
    #[error("Load balancer name must not be empty")]
    EmptyName,
}
