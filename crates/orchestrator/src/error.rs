//! Orchestrator error types.

use common::{AggregateId, ErrorCode, ResourceId};
use domain::DomainError;
use resource_store::StoreError;
use thiserror::Error;

/// Errors that can occur while running a load balancer operation.
#[derive(Debug, Error)]
pub enum LoadBalancerError {
    /// The load balancer is already bound to a different provider type.
    #[error("Load balancer {load_balancer_id} uses provider type {current}, cannot attach {requested}")]
    ProviderTypeMismatch {
        load_balancer_id: AggregateId,
        current: String,
        requested: String,
    },

    /// The VM NIC's L3 network has no load balancer service enabled.
    #[error("L3 network {l3_network_id} of VM NIC {vm_nic_id} has no load balancer service enabled")]
    LbServiceNotEnabled {
        vm_nic_id: ResourceId,
        l3_network_id: ResourceId,
    },

    /// The VIP is locked by another network service.
    #[error("VIP {vip_id} is already used by {use_for}")]
    VipInUse { vip_id: ResourceId, use_for: String },

    /// A resource referenced by the command does not exist.
    #[error("{kind} not found: {id}")]
    ResourceNotFound { kind: &'static str, id: String },

    /// The resource is already attached to the load balancer.
    #[error("{kind} {id} already exists on load balancer {load_balancer_id}")]
    AlreadyExists {
        kind: &'static str,
        id: ResourceId,
        load_balancer_id: AggregateId,
    },

    /// The load balancer itself does not exist.
    #[error("Load balancer not found: {0}")]
    LoadBalancerNotFound(AggregateId),

    /// The backend rejected the call; the code is passed through untouched.
    #[error("Backend error: {0}")]
    Backend(ErrorCode),

    /// No backend is registered for the provider type.
    #[error("No backend registered for provider type {0}")]
    NoBackend(String),

    /// The task queue dropped the command before it replied.
    #[error("Command for load balancer {0} ended without a reply")]
    NoReply(AggregateId),

    /// Domain validation error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Resource store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LoadBalancerError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        LoadBalancerError::ResourceNotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Returns true for errors raised before any mutation because the
    /// command itself cannot be applied.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LoadBalancerError::ProviderTypeMismatch { .. }
                | LoadBalancerError::LbServiceNotEnabled { .. }
                | LoadBalancerError::VipInUse { .. }
                | LoadBalancerError::ResourceNotFound { .. }
                | LoadBalancerError::AlreadyExists { .. }
                | LoadBalancerError::Domain(_)
        )
    }

    /// Converts the error into the code carried by a failure reply.
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            LoadBalancerError::Backend(code) => code.clone(),
            e if e.is_validation() => ErrorCode::operation_failure(e.to_string()),
            LoadBalancerError::LoadBalancerNotFound(_)
            | LoadBalancerError::Store(StoreError::NotFound {
                kind: "LoadBalancer",
                ..
            }) => ErrorCode::new(ErrorCode::RESOURCE_NOT_FOUND, self.to_string()),
            LoadBalancerError::Store(_) => ErrorCode::new(ErrorCode::STORE_ERROR, self.to_string()),
            _ => ErrorCode::new(ErrorCode::INTERNAL_ERROR, self.to_string()),
        }
    }
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, LoadBalancerError>;
