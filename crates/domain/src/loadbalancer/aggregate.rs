//! Load balancer aggregate and its child records.

use chrono::{DateTime, Utc};
use common::{AggregateId, ResourceId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

use super::{ListenerProtocol, Port, VmNicStatus};

/// Join row attaching a VIP to a load balancer.
///
/// Existence alone means "attached"; there are no intermediate states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VipRef {
    pub id: ResourceId,
    pub load_balancer_id: AggregateId,
    pub vip_id: ResourceId,
    pub created_at: DateTime<Utc>,
}

impl VipRef {
    pub fn new(load_balancer_id: AggregateId, vip_id: ResourceId) -> Self {
        Self {
            id: ResourceId::new(),
            load_balancer_id,
            vip_id,
            created_at: Utc::now(),
        }
    }
}

/// Join row attaching a VM NIC to a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmNicRef {
    pub id: ResourceId,
    pub load_balancer_id: AggregateId,
    pub vm_nic_id: ResourceId,
    pub status: VmNicStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VmNicRef {
    /// Creates a ref in the Pending state.
    pub fn pending(load_balancer_id: AggregateId, vm_nic_id: ResourceId) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::new(),
            load_balancer_id,
            vm_nic_id,
            status: VmNicStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Promotes the ref to Active once the backend has confirmed the attach.
    pub fn activate(&mut self) -> Result<(), DomainError> {
        if !self.status.can_activate() {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status,
                to: VmNicStatus::Active,
            });
        }
        self.status = VmNicStatus::Active;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// A port listener owned by a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub id: ResourceId,
    pub load_balancer_id: AggregateId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub instance_port: Port,
    pub load_balancer_port: Port,
    pub protocol: ListenerProtocol,
    pub created_at: DateTime<Utc>,
}

/// Load balancer aggregate root.
///
/// The unit of serialization: every mutating command against one load
/// balancer runs alone, and the aggregate is reloaded from the store at the
/// boundaries of each operation instead of being cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: AggregateId,
    pub name: String,
    pub description: Option<String>,
    /// Set by the first VM NIC attach and immutable afterwards.
    pub provider_type: Option<String>,
    pub vip_refs: Vec<VipRef>,
    pub vm_nic_refs: Vec<VmNicRef>,
    pub listeners: Vec<Listener>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoadBalancer {
    /// Creates an empty load balancer with no provider bound yet.
    pub fn new(name: impl Into<String>, description: Option<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::EmptyName);
        }

        let now = Utc::now();
        Ok(Self {
            id: AggregateId::new(),
            name,
            description,
            provider_type: None,
            vip_refs: Vec::new(),
            vm_nic_refs: Vec::new(),
            listeners: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns true when mutations must be pushed to a backend: a provider
    /// is bound and at least one VM NIC is attached.
    pub fn needs_action(&self) -> bool {
        self.provider_type.is_some() && !self.vm_nic_refs.is_empty()
    }

    /// Returns true if `provider_type` is compatible with this load balancer.
    pub fn accepts_provider(&self, provider_type: &str) -> bool {
        self.provider_type
            .as_deref()
            .is_none_or(|current| current == provider_type)
    }

    pub fn vip_ids(&self) -> Vec<ResourceId> {
        self.vip_refs.iter().map(|r| r.vip_id).collect()
    }

    pub fn vm_nic_ids(&self) -> Vec<ResourceId> {
        self.vm_nic_refs.iter().map(|r| r.vm_nic_id).collect()
    }

    pub fn find_vip_ref(&self, vip_id: ResourceId) -> Option<&VipRef> {
        self.vip_refs.iter().find(|r| r.vip_id == vip_id)
    }

    pub fn find_vm_nic_ref(&self, vm_nic_id: ResourceId) -> Option<&VmNicRef> {
        self.vm_nic_refs.iter().find(|r| r.vm_nic_id == vm_nic_id)
    }

    pub fn find_listener(&self, listener_id: ResourceId) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.id == listener_id)
    }

    /// Returns the read-only snapshot published in reply events.
    pub fn inventory(&self) -> LoadBalancerInventory {
        LoadBalancerInventory::from(self)
    }
}

/// Serializable snapshot of a load balancer and everything attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerInventory {
    pub id: AggregateId,
    pub name: String,
    pub description: Option<String>,
    pub provider_type: Option<String>,
    pub vip_refs: Vec<VipRef>,
    pub vm_nic_refs: Vec<VmNicRef>,
    pub listeners: Vec<Listener>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&LoadBalancer> for LoadBalancerInventory {
    fn from(lb: &LoadBalancer) -> Self {
        Self {
            id: lb.id,
            name: lb.name.clone(),
            description: lb.description.clone(),
            provider_type: lb.provider_type.clone(),
            vip_refs: lb.vip_refs.clone(),
            vm_nic_refs: lb.vm_nic_refs.clone(),
            listeners: lb.listeners.clone(),
            created_at: lb.created_at,
            updated_at: lb.updated_at,
        }
    }
}
