use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{AggregateId, ResourceId};
use domain::{L3Network, Listener, LoadBalancer, Vip, VipRef, VmNic, VmNicRef, VmNicStatus};
use tokio::sync::RwLock;

use crate::{Result, StoreError, store::ResourceStore};

#[derive(Default)]
struct State {
    // Load balancers carry their refs and listeners inline.
    load_balancers: HashMap<AggregateId, LoadBalancer>,
    vips: HashMap<ResourceId, Vip>,
    vm_nics: HashMap<ResourceId, VmNic>,
    l3_networks: HashMap<ResourceId, L3Network>,
    fail_on_write: bool,
    failing_writes: usize,
}

impl State {
    fn check_writable(&mut self) -> Result<()> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StoreError::Unavailable(
                "in-memory store rejected a write".to_string(),
            ));
        }
        if self.fail_on_write {
            return Err(StoreError::Unavailable(
                "in-memory store is rejecting writes".to_string(),
            ));
        }
        Ok(())
    }

    fn load_balancer_mut(&mut self, id: AggregateId) -> Result<&mut LoadBalancer> {
        self.load_balancers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("LoadBalancer", id))
    }
}

/// In-memory resource store implementation for testing.
///
/// Enforces the same keys and references as the PostgreSQL schema so tests
/// observe the same failures.
#[derive(Clone, Default)]
pub struct InMemoryResourceStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryResourceStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`StoreError::Unavailable`].
    pub async fn set_fail_on_write(&self, fail: bool) {
        self.state.write().await.fail_on_write = fail;
    }

    /// Makes the next `count` writes fail, after which writes succeed again.
    pub async fn fail_next_writes(&self, count: usize) {
        self.state.write().await.failing_writes = count;
    }

    /// Returns the number of stored load balancers.
    pub async fn load_balancer_count(&self) -> usize {
        self.state.read().await.load_balancers.len()
    }

    /// Returns the number of stored VIPs.
    pub async fn vip_count(&self) -> usize {
        self.state.read().await.vips.len()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn insert_load_balancer(&self, lb: &LoadBalancer) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        if state.load_balancers.contains_key(&lb.id) {
            return Err(StoreError::duplicate("LoadBalancer", lb.id));
        }

        let mut row = lb.clone();
        row.vip_refs.clear();
        row.vm_nic_refs.clear();
        row.listeners.clear();
        state.load_balancers.insert(lb.id, row);
        Ok(())
    }

    async fn find_load_balancer(&self, id: AggregateId) -> Result<Option<LoadBalancer>> {
        Ok(self.state.read().await.load_balancers.get(&id).cloned())
    }

    async fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>> {
        let state = self.state.read().await;
        let mut lbs: Vec<_> = state.load_balancers.values().cloned().collect();
        lbs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.id.as_uuid().cmp(&b.id.as_uuid()))
        });
        Ok(lbs)
    }

    async fn update_provider_type(
        &self,
        id: AggregateId,
        provider_type: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        let lb = state.load_balancer_mut(id)?;
        lb.provider_type = provider_type.map(str::to_string);
        lb.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_listener(&self, listener: &Listener) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        let exists = state
            .load_balancers
            .values()
            .any(|lb| lb.find_listener(listener.id).is_some());
        if exists {
            return Err(StoreError::duplicate("Listener", listener.id));
        }

        let lb = state.load_balancer_mut(listener.load_balancer_id)?;
        lb.listeners.push(listener.clone());
        Ok(())
    }

    async fn find_listener(&self, id: ResourceId) -> Result<Option<Listener>> {
        let state = self.state.read().await;
        Ok(state
            .load_balancers
            .values()
            .find_map(|lb| lb.find_listener(id))
            .cloned())
    }

    async fn remove_listener(&self, id: ResourceId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        for lb in state.load_balancers.values_mut() {
            if let Some(pos) = lb.listeners.iter().position(|l| l.id == id) {
                lb.listeners.remove(pos);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn insert_vip_ref(&self, vip_ref: &VipRef) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        if !state.vips.contains_key(&vip_ref.vip_id) {
            return Err(StoreError::not_found("Vip", vip_ref.vip_id));
        }

        let lb = state.load_balancer_mut(vip_ref.load_balancer_id)?;
        if lb.find_vip_ref(vip_ref.vip_id).is_some() {
            return Err(StoreError::duplicate("VipRef", vip_ref.vip_id));
        }
        lb.vip_refs.push(vip_ref.clone());
        Ok(())
    }

    async fn find_vip_ref(
        &self,
        load_balancer_id: AggregateId,
        vip_id: ResourceId,
    ) -> Result<Option<VipRef>> {
        let state = self.state.read().await;
        Ok(state
            .load_balancers
            .get(&load_balancer_id)
            .and_then(|lb| lb.find_vip_ref(vip_id))
            .cloned())
    }

    async fn remove_vip_ref(&self, id: ResourceId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        for lb in state.load_balancers.values_mut() {
            if let Some(pos) = lb.vip_refs.iter().position(|r| r.id == id) {
                lb.vip_refs.remove(pos);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn insert_vm_nic_ref(&self, nic_ref: &VmNicRef) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        if !state.vm_nics.contains_key(&nic_ref.vm_nic_id) {
            return Err(StoreError::not_found("VmNic", nic_ref.vm_nic_id));
        }

        let lb = state.load_balancer_mut(nic_ref.load_balancer_id)?;
        if lb.find_vm_nic_ref(nic_ref.vm_nic_id).is_some() {
            return Err(StoreError::duplicate("VmNicRef", nic_ref.vm_nic_id));
        }
        lb.vm_nic_refs.push(nic_ref.clone());
        Ok(())
    }

    async fn find_vm_nic_ref(
        &self,
        load_balancer_id: AggregateId,
        vm_nic_id: ResourceId,
    ) -> Result<Option<VmNicRef>> {
        let state = self.state.read().await;
        Ok(state
            .load_balancers
            .get(&load_balancer_id)
            .and_then(|lb| lb.find_vm_nic_ref(vm_nic_id))
            .cloned())
    }

    async fn update_vm_nic_ref_status(&self, id: ResourceId, status: VmNicStatus) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        let nic_ref = state
            .load_balancers
            .values_mut()
            .flat_map(|lb| lb.vm_nic_refs.iter_mut())
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::not_found("VmNicRef", id))?;
        nic_ref.status = status;
        nic_ref.updated_at = Utc::now();
        Ok(())
    }

    async fn remove_vm_nic_ref(&self, id: ResourceId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        for lb in state.load_balancers.values_mut() {
            if let Some(pos) = lb.vm_nic_refs.iter().position(|r| r.id == id) {
                lb.vm_nic_refs.remove(pos);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn insert_vip(&self, vip: &Vip) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        if state.vips.contains_key(&vip.id) {
            return Err(StoreError::duplicate("Vip", vip.id));
        }
        state.vips.insert(vip.id, vip.clone());
        Ok(())
    }

    async fn find_vip(&self, id: ResourceId) -> Result<Option<Vip>> {
        Ok(self.state.read().await.vips.get(&id).cloned())
    }

    async fn find_vips(&self, ids: &[ResourceId]) -> Result<Vec<Vip>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.vips.get(id))
            .cloned()
            .collect())
    }

    async fn update_vip_use_for(&self, id: ResourceId, use_for: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        let vip = state
            .vips
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Vip", id))?;
        vip.use_for = use_for.map(str::to_string);
        Ok(())
    }

    async fn remove_vip(&self, id: ResourceId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        let removed = state.vips.remove(&id).is_some();
        if removed {
            for lb in state.load_balancers.values_mut() {
                lb.vip_refs.retain(|r| r.vip_id != id);
            }
        }
        Ok(removed)
    }

    async fn insert_vm_nic(&self, nic: &VmNic) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        if state.vm_nics.contains_key(&nic.id) {
            return Err(StoreError::duplicate("VmNic", nic.id));
        }
        state.vm_nics.insert(nic.id, nic.clone());
        Ok(())
    }

    async fn find_vm_nic(&self, id: ResourceId) -> Result<Option<VmNic>> {
        Ok(self.state.read().await.vm_nics.get(&id).cloned())
    }

    async fn find_vm_nics(&self, ids: &[ResourceId]) -> Result<Vec<VmNic>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.vm_nics.get(id))
            .cloned()
            .collect())
    }

    async fn insert_l3_network(&self, l3: &L3Network) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_writable()?;

        if state.l3_networks.contains_key(&l3.id) {
            return Err(StoreError::duplicate("L3Network", l3.id));
        }
        state.l3_networks.insert(l3.id, l3.clone());
        Ok(())
    }

    async fn find_l3_network(&self, id: ResourceId) -> Result<Option<L3Network>> {
        Ok(self.state.read().await.l3_networks.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResourceStoreExt;
    use domain::{CreateListener, LB_NETWORK_SERVICE_TYPE};

    async fn seeded() -> (InMemoryResourceStore, LoadBalancer, Vip, VmNic) {
        let store = InMemoryResourceStore::new();
        let l3 = L3Network::new("public").with_service(LB_NETWORK_SERVICE_TYPE, "VirtualRouter");
        let vip = Vip::new("vip", "10.0.0.10", l3.id);
        let nic = VmNic::new(ResourceId::new(), l3.id, "fa:16:3e:00:00:01");
        let lb = LoadBalancer::new("web", None).unwrap();

        store.insert_l3_network(&l3).await.unwrap();
        store.insert_vip(&vip).await.unwrap();
        store.insert_vm_nic(&nic).await.unwrap();
        store.insert_load_balancer(&lb).await.unwrap();

        (store, lb, vip, nic)
    }

    fn listener_for(lb: &LoadBalancer) -> Listener {
        let cmd = CreateListener::new(8080, 80, "tcp").unwrap();
        Listener {
            id: ResourceId::new(),
            load_balancer_id: lb.id,
            name: None,
            description: None,
            instance_port: cmd.instance_port,
            load_balancer_port: cmd.load_balancer_port,
            protocol: cmd.protocol,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_reload_load_balancer() {
        let (store, lb, _, _) = seeded().await;

        let loaded = store.reload_load_balancer(lb.id).await.unwrap();
        assert_eq!(loaded.id, lb.id);
        assert_eq!(loaded.name, "web");
        assert!(loaded.provider_type.is_none());

        let missing = store.reload_load_balancer(AggregateId::new()).await;
        assert!(matches!(missing, Err(StoreError::NotFound { kind: "LoadBalancer", .. })));
    }

    #[tokio::test]
    async fn test_duplicate_load_balancer_rejected() {
        let (store, lb, _, _) = seeded().await;
        let result = store.insert_load_balancer(&lb).await;
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    #[tokio::test]
    async fn test_children_appear_on_reload() {
        let (store, lb, vip, nic) = seeded().await;

        let listener = listener_for(&lb);
        store.insert_listener(&listener).await.unwrap();
        store.insert_vip_ref(&VipRef::new(lb.id, vip.id)).await.unwrap();
        store
            .insert_vm_nic_ref(&VmNicRef::pending(lb.id, nic.id))
            .await
            .unwrap();

        let loaded = store.reload_load_balancer(lb.id).await.unwrap();
        assert_eq!(loaded.listeners, vec![listener]);
        assert_eq!(loaded.vip_ids(), vec![vip.id]);
        assert_eq!(loaded.vm_nic_ids(), vec![nic.id]);
    }

    #[tokio::test]
    async fn test_refs_are_unique_per_load_balancer() {
        let (store, lb, vip, nic) = seeded().await;

        store.insert_vip_ref(&VipRef::new(lb.id, vip.id)).await.unwrap();
        let dup = store.insert_vip_ref(&VipRef::new(lb.id, vip.id)).await;
        assert!(matches!(dup, Err(StoreError::Duplicate { kind: "VipRef", .. })));

        store
            .insert_vm_nic_ref(&VmNicRef::pending(lb.id, nic.id))
            .await
            .unwrap();
        let dup = store
            .insert_vm_nic_ref(&VmNicRef::pending(lb.id, nic.id))
            .await;
        assert!(matches!(dup, Err(StoreError::Duplicate { kind: "VmNicRef", .. })));

        // The same VIP may be attached to another load balancer.
        let other = LoadBalancer::new("other", None).unwrap();
        store.insert_load_balancer(&other).await.unwrap();
        store.insert_vip_ref(&VipRef::new(other.id, vip.id)).await.unwrap();
    }

    #[tokio::test]
    async fn test_refs_require_referenced_rows() {
        let (store, lb, _, _) = seeded().await;

        let result = store.insert_vip_ref(&VipRef::new(lb.id, ResourceId::new())).await;
        assert!(matches!(result, Err(StoreError::NotFound { kind: "Vip", .. })));

        let result = store
            .insert_vm_nic_ref(&VmNicRef::pending(lb.id, ResourceId::new()))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { kind: "VmNic", .. })));

        let mut orphan = listener_for(&lb);
        orphan.load_balancer_id = AggregateId::new();
        let result = store.insert_listener(&orphan).await;
        assert!(matches!(result, Err(StoreError::NotFound { kind: "LoadBalancer", .. })));
    }

    #[tokio::test]
    async fn test_ref_lookup_is_scoped_to_load_balancer() {
        let (store, lb, vip, _) = seeded().await;
        store.insert_vip_ref(&VipRef::new(lb.id, vip.id)).await.unwrap();

        assert!(store.find_vip_ref(lb.id, vip.id).await.unwrap().is_some());
        assert!(
            store
                .find_vip_ref(AggregateId::new(), vip.id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_update_vm_nic_ref_status() {
        let (store, lb, _, nic) = seeded().await;
        let nic_ref = VmNicRef::pending(lb.id, nic.id);
        store.insert_vm_nic_ref(&nic_ref).await.unwrap();

        store
            .update_vm_nic_ref_status(nic_ref.id, VmNicStatus::Active)
            .await
            .unwrap();

        let loaded = store.find_vm_nic_ref(lb.id, nic.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, VmNicStatus::Active);

        let missing = store
            .update_vm_nic_ref_status(ResourceId::new(), VmNicStatus::Active)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_remove_vip_cascades_refs() {
        let (store, lb, vip, _) = seeded().await;
        store.insert_vip_ref(&VipRef::new(lb.id, vip.id)).await.unwrap();

        assert!(store.remove_vip(vip.id).await.unwrap());
        assert!(!store.remove_vip(vip.id).await.unwrap());

        let loaded = store.reload_load_balancer(lb.id).await.unwrap();
        assert!(loaded.vip_refs.is_empty());
        assert_eq!(store.vip_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_provider_type_and_vip_lock() {
        let (store, lb, vip, _) = seeded().await;

        store
            .update_provider_type(lb.id, Some("VirtualRouter"))
            .await
            .unwrap();
        store
            .update_vip_use_for(vip.id, Some(LB_NETWORK_SERVICE_TYPE))
            .await
            .unwrap();

        let loaded = store.reload_load_balancer(lb.id).await.unwrap();
        assert_eq!(loaded.provider_type.as_deref(), Some("VirtualRouter"));
        let vip = store.require_vip(vip.id).await.unwrap();
        assert_eq!(vip.use_for.as_deref(), Some(LB_NETWORK_SERVICE_TYPE));
    }

    #[tokio::test]
    async fn test_fail_on_write() {
        let (store, lb, vip, _) = seeded().await;
        store.set_fail_on_write(true).await;

        let result = store.insert_vip_ref(&VipRef::new(lb.id, vip.id)).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        // Reads still work.
        assert!(store.find_load_balancer(lb.id).await.unwrap().is_some());

        store.set_fail_on_write(false).await;
        store.insert_vip_ref(&VipRef::new(lb.id, vip.id)).await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_next_writes_recovers() {
        let (store, lb, vip, _) = seeded().await;
        store.fail_next_writes(1).await;

        let vip_ref = VipRef::new(lb.id, vip.id);
        assert!(matches!(
            store.insert_vip_ref(&vip_ref).await,
            Err(StoreError::Unavailable(_))
        ));
        store.insert_vip_ref(&vip_ref).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_many_skips_missing() {
        let (store, _, vip, nic) = seeded().await;

        let vips = store.find_vips(&[vip.id, ResourceId::new()]).await.unwrap();
        assert_eq!(vips, vec![vip]);

        let nics = store.find_vm_nics(&[ResourceId::new(), nic.id]).await.unwrap();
        assert_eq!(nics, vec![nic]);
    }

    #[tokio::test]
    async fn test_list_load_balancers_oldest_first() {
        let (store, first, _, _) = seeded().await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = LoadBalancer::new("second", None).unwrap();
        store.insert_load_balancer(&second).await.unwrap();

        let ids: Vec<_> = store
            .list_load_balancers()
            .await
            .unwrap()
            .into_iter()
            .map(|lb| lb.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(store.load_balancer_count().await, 2);
    }
}
