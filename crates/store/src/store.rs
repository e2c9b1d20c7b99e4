use async_trait::async_trait;
use common::{AggregateId, ResourceId};
use domain::{L3Network, Listener, LoadBalancer, Vip, VipRef, VmNic, VmNicRef, VmNicStatus};

use crate::{Result, StoreError};

/// Core trait for load balancer persistence.
///
/// Every method is a single atomic write or read. Callers that need a fresh
/// view of a load balancer reload it through [`ResourceStoreExt`] rather than
/// caching the aggregate.
///
/// Removals return `true` when a row was deleted and `false` when there was
/// nothing to delete. Updates of a missing row fail with
/// [`StoreError::NotFound`].
#[async_trait]
pub trait ResourceStore: Send + Sync {
    // -- load balancers --

    /// Persists a new load balancer. Children on the aggregate are ignored.
    async fn insert_load_balancer(&self, lb: &LoadBalancer) -> Result<()>;

    /// Loads a load balancer together with its refs and listeners.
    async fn find_load_balancer(&self, id: AggregateId) -> Result<Option<LoadBalancer>>;

    /// Loads every load balancer, oldest first.
    async fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>>;

    /// Sets or clears the provider type bound to a load balancer.
    async fn update_provider_type(
        &self,
        id: AggregateId,
        provider_type: Option<&str>,
    ) -> Result<()>;

    // -- listeners --

    async fn insert_listener(&self, listener: &Listener) -> Result<()>;

    async fn find_listener(&self, id: ResourceId) -> Result<Option<Listener>>;

    async fn remove_listener(&self, id: ResourceId) -> Result<bool>;

    // -- VIP refs --

    async fn insert_vip_ref(&self, vip_ref: &VipRef) -> Result<()>;

    /// Finds the ref attaching `vip_id` to `load_balancer_id`.
    async fn find_vip_ref(
        &self,
        load_balancer_id: AggregateId,
        vip_id: ResourceId,
    ) -> Result<Option<VipRef>>;

    async fn remove_vip_ref(&self, id: ResourceId) -> Result<bool>;

    // -- VM NIC refs --

    async fn insert_vm_nic_ref(&self, nic_ref: &VmNicRef) -> Result<()>;

    /// Finds the ref attaching `vm_nic_id` to `load_balancer_id`.
    async fn find_vm_nic_ref(
        &self,
        load_balancer_id: AggregateId,
        vm_nic_id: ResourceId,
    ) -> Result<Option<VmNicRef>>;

    async fn update_vm_nic_ref_status(&self, id: ResourceId, status: VmNicStatus) -> Result<()>;

    async fn remove_vm_nic_ref(&self, id: ResourceId) -> Result<bool>;

    // -- VIPs --

    async fn insert_vip(&self, vip: &Vip) -> Result<()>;

    async fn find_vip(&self, id: ResourceId) -> Result<Option<Vip>>;

    /// Loads the VIPs with the given IDs. Missing IDs are skipped.
    async fn find_vips(&self, ids: &[ResourceId]) -> Result<Vec<Vip>>;

    /// Sets or clears the network service holding the VIP.
    async fn update_vip_use_for(&self, id: ResourceId, use_for: Option<&str>) -> Result<()>;

    /// Deletes a VIP. Refs pointing at it are deleted with it.
    async fn remove_vip(&self, id: ResourceId) -> Result<bool>;

    // -- VM NICs --

    async fn insert_vm_nic(&self, nic: &VmNic) -> Result<()>;

    async fn find_vm_nic(&self, id: ResourceId) -> Result<Option<VmNic>>;

    /// Loads the VM NICs with the given IDs. Missing IDs are skipped.
    async fn find_vm_nics(&self, ids: &[ResourceId]) -> Result<Vec<VmNic>>;

    // -- L3 networks --

    async fn insert_l3_network(&self, l3: &L3Network) -> Result<()>;

    async fn find_l3_network(&self, id: ResourceId) -> Result<Option<L3Network>>;
}

/// Extension trait with lookups that treat absence as an error.
#[async_trait]
pub trait ResourceStoreExt: ResourceStore {
    /// Reloads a load balancer, failing if it no longer exists.
    async fn reload_load_balancer(&self, id: AggregateId) -> Result<LoadBalancer> {
        self.find_load_balancer(id)
            .await?
            .ok_or_else(|| StoreError::not_found("LoadBalancer", id))
    }

    async fn require_vip(&self, id: ResourceId) -> Result<Vip> {
        self.find_vip(id)
            .await?
            .ok_or_else(|| StoreError::not_found("Vip", id))
    }

    async fn require_vm_nic(&self, id: ResourceId) -> Result<VmNic> {
        self.find_vm_nic(id)
            .await?
            .ok_or_else(|| StoreError::not_found("VmNic", id))
    }

    async fn require_l3_network(&self, id: ResourceId) -> Result<L3Network> {
        self.find_l3_network(id)
            .await?
            .ok_or_else(|| StoreError::not_found("L3Network", id))
    }
}

// Blanket implementation for all ResourceStore implementations
impl<T: ResourceStore + ?Sized> ResourceStoreExt for T {}
