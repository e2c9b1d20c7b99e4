//! Lifecycle operations for a single load balancer.
//!
//! Every operation reloads the aggregate when it starts and again before it
//! returns, so the inventory it hands back reflects what was persisted. The
//! caller is responsible for running at most one operation per load
//! balancer at a time (see [`crate::manager`]).

use std::sync::Arc;

use chrono::Utc;
use common::{AggregateId, ResourceId};
use domain::{
    CreateListener, LB_NETWORK_SERVICE_TYPE, Listener, LoadBalancer, LoadBalancerInventory, Vip,
    VipRef, VmNic, VmNicRef,
};
use resource_store::{ResourceStoreExt, StoreError};
use saga::{FlowChain, FlowFailure, Step};

use crate::error::{LoadBalancerError, Result};
use crate::services::{LoadBalancerBackend, LoadBalancerServices, LoadBalancerStruct};

/// Operations against one load balancer.
#[derive(Clone)]
pub struct LoadBalancerBase {
    services: LoadBalancerServices,
    id: AggregateId,
}

impl LoadBalancerBase {
    pub fn new(services: LoadBalancerServices, id: AggregateId) -> Self {
        Self { services, id }
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Loads the current state of the load balancer.
    pub async fn reload(&self) -> Result<LoadBalancer> {
        match self.services.store.reload_load_balancer(self.id).await {
            Ok(lb) => Ok(lb),
            Err(StoreError::NotFound {
                kind: "LoadBalancer",
                ..
            }) => Err(LoadBalancerError::LoadBalancerNotFound(self.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn inventory(&self) -> Result<LoadBalancerInventory> {
        Ok(self.reload().await?.inventory())
    }

    /// Builds the view handed to backends from a fresh reload.
    pub async fn make_struct(&self) -> Result<LoadBalancerStruct> {
        let lb = self.reload().await?;
        let vips = self.services.store.find_vips(&lb.vip_ids()).await?;
        let vm_nics = self.services.store.find_vm_nics(&lb.vm_nic_ids()).await?;

        Ok(LoadBalancerStruct {
            load_balancer: lb.inventory(),
            vips,
            vm_nics,
        })
    }

    fn backend_for(&self, lb: &LoadBalancerInventory) -> Result<Arc<dyn LoadBalancerBackend>> {
        let provider_type = lb
            .provider_type
            .as_deref()
            .ok_or_else(|| LoadBalancerError::NoBackend("<unset>".to_string()))?;
        self.services.backends.get(provider_type)
    }

    async fn find_vip(&self, vip_id: ResourceId) -> Result<Vip> {
        self.services
            .store
            .find_vip(vip_id)
            .await?
            .ok_or_else(|| LoadBalancerError::not_found("Vip", vip_id))
    }

    async fn find_vm_nic(&self, vm_nic_id: ResourceId) -> Result<VmNic> {
        self.services
            .store
            .find_vm_nic(vm_nic_id)
            .await?
            .ok_or_else(|| LoadBalancerError::not_found("VmNic", vm_nic_id))
    }

    // -- listeners --

    /// Persists a listener and, when the load balancer is live on a
    /// backend, pushes it there. The row is removed again if the backend
    /// rejects it.
    #[tracing::instrument(skip(self, cmd), fields(load_balancer_id = %self.id))]
    pub async fn create_listener(&self, cmd: CreateListener) -> Result<LoadBalancerInventory> {
        let lb = self.reload().await?;

        let listener_id = cmd.resource_id.unwrap_or_default();
        if self.services.store.find_listener(listener_id).await?.is_some() {
            return Err(LoadBalancerError::AlreadyExists {
                kind: "Listener",
                id: listener_id,
                load_balancer_id: self.id,
            });
        }

        let listener = Listener {
            id: listener_id,
            load_balancer_id: self.id,
            name: cmd.name,
            description: cmd.description,
            instance_port: cmd.instance_port,
            load_balancer_port: cmd.load_balancer_port,
            protocol: cmd.protocol,
            created_at: Utc::now(),
        };

        let mut chain = FlowChain::new("create-listener").then(
            CreateListenerStep::new("persist-listener", |ctx| Box::pin(ctx.persist_listener()))
                .with_rollback(|ctx| Box::pin(ctx.delete_listener())),
        );
        if lb.needs_action() {
            chain = chain.then(CreateListenerStep::new("backend-add-listener", |ctx| {
                Box::pin(ctx.backend_add_listener())
            }));
        }

        let mut ctx = CreateListenerFlow {
            base: self.clone(),
            listener,
        };
        chain.run(&mut ctx).await.map_err(FlowFailure::into_error)?;

        tracing::info!(listener_id = %ctx.listener.id, "listener created");
        self.inventory().await
    }

    /// Deletes a listener. Unknown listeners are a no-op.
    #[tracing::instrument(skip(self), fields(load_balancer_id = %self.id))]
    pub async fn delete_listener(&self, listener_id: ResourceId) -> Result<LoadBalancerInventory> {
        let lb = self.reload().await?;
        let Some(listener) = lb.find_listener(listener_id).cloned() else {
            tracing::debug!(%listener_id, "listener not found, nothing to delete");
            return Ok(lb.inventory());
        };

        if lb.needs_action() {
            let chain = FlowChain::new("delete-listener").then(DeleteListenerStep::new(
                "backend-remove-listener",
                |ctx| Box::pin(ctx.backend_remove_listener()),
            ));
            let mut ctx = DeleteListenerFlow {
                base: self.clone(),
                listener,
            };
            chain.run(&mut ctx).await.map_err(FlowFailure::into_error)?;
        }

        self.services.store.remove_listener(listener_id).await?;
        tracing::info!(%listener_id, "listener deleted");
        self.inventory().await
    }

    // -- VIPs --

    /// Attaches a VIP.
    ///
    /// The ref is written first. Without a live backend the VIP is only
    /// locked, and a failed lock discards just the new ref. Otherwise the VIP
    /// is locked and pushed to the backend; if either step fails, the VIP is
    /// unlocked and then deleted along with its refs.
    #[tracing::instrument(skip(self), fields(load_balancer_id = %self.id))]
    pub async fn add_vip(&self, vip_id: ResourceId) -> Result<LoadBalancerInventory> {
        let lb = self.reload().await?;
        let vip = self.find_vip(vip_id).await?;

        if lb.find_vip_ref(vip_id).is_some() {
            return Err(LoadBalancerError::AlreadyExists {
                kind: "Vip",
                id: vip_id,
                load_balancer_id: self.id,
            });
        }
        if let Some(requested) = vip.service_provider.as_deref() {
            if !lb.accepts_provider(requested) {
                return Err(LoadBalancerError::ProviderTypeMismatch {
                    load_balancer_id: self.id,
                    current: lb.provider_type.clone().unwrap_or_default(),
                    requested: requested.to_string(),
                });
            }
        }

        let vip_ref = VipRef::new(self.id, vip_id);
        self.services.store.insert_vip_ref(&vip_ref).await?;

        if !lb.needs_action() {
            if let Err(error) = self
                .services
                .vip_manager
                .lock(&vip, LB_NETWORK_SERVICE_TYPE)
                .await
            {
                self.discard_vip_ref(&vip_ref).await;
                return Err(error);
            }
            tracing::info!(%vip_id, "VIP attached");
            return self.inventory().await;
        }

        let chain = FlowChain::new("add-vip")
            .then(
                AddVipStep::new("lock-vip", |ctx| Box::pin(ctx.lock_vip()))
                    .with_rollback(|ctx| Box::pin(ctx.unlock_vip())),
            )
            .then(AddVipStep::new("backend-add-vip", |ctx| {
                Box::pin(ctx.backend_add_vip())
            }));

        let mut ctx = AddVipFlow {
            base: self.clone(),
            vip,
        };
        if let Err(failure) = chain.run(&mut ctx).await {
            self.discard_vip(&ctx.vip).await;
            return Err(failure.into_error());
        }

        tracing::info!(%vip_id, "VIP attached");
        self.inventory().await
    }

    async fn discard_vip_ref(&self, vip_ref: &VipRef) {
        if let Err(error) = self.services.store.remove_vip_ref(vip_ref.id).await {
            tracing::warn!(vip_id = %vip_ref.vip_id, %error, "failed to discard VIP ref");
        }
    }

    async fn discard_vip(&self, vip: &Vip) {
        match self.services.store.remove_vip(vip.id).await {
            Ok(_) => tracing::warn!(vip_id = %vip.id, "VIP deleted after failed attach"),
            Err(error) => tracing::warn!(vip_id = %vip.id, %error, "failed to delete VIP after failed attach"),
        }
    }

    /// Detaches a VIP. Unknown VIPs are a no-op.
    ///
    /// Without a live backend only the ref is removed and the VIP stays
    /// locked.
    #[tracing::instrument(skip(self), fields(load_balancer_id = %self.id))]
    pub async fn remove_vip(&self, vip_id: ResourceId) -> Result<LoadBalancerInventory> {
        let lb = self.reload().await?;
        let Some(vip_ref) = self.services.store.find_vip_ref(self.id, vip_id).await? else {
            tracing::debug!(%vip_id, "VIP not attached, nothing to remove");
            return Ok(lb.inventory());
        };

        if lb.needs_action() {
            let vip = self.find_vip(vip_id).await?;
            let chain = FlowChain::new("remove-vip")
                .then(RemoveVipStep::new("backend-remove-vip", |ctx| {
                    Box::pin(ctx.backend_remove_vip())
                }))
                .then(RemoveVipStep::new("unlock-vip", |ctx| {
                    Box::pin(ctx.unlock_vip())
                }));

            let mut ctx = RemoveVipFlow {
                base: self.clone(),
                vip,
            };
            chain.run(&mut ctx).await.map_err(FlowFailure::into_error)?;
        }

        self.services.store.remove_vip_ref(vip_ref.id).await?;
        tracing::info!(%vip_id, "VIP detached");
        self.inventory().await
    }

    // -- VM NICs --

    /// Attaches a VM NIC, binding the load balancer to the NIC's provider
    /// type if it has none yet.
    #[tracing::instrument(skip(self), fields(load_balancer_id = %self.id))]
    pub async fn add_vm_nic(&self, vm_nic_id: ResourceId) -> Result<LoadBalancerInventory> {
        let lb = self.reload().await?;
        let nic = self.find_vm_nic(vm_nic_id).await?;

        if lb.find_vm_nic_ref(vm_nic_id).is_some() {
            return Err(LoadBalancerError::AlreadyExists {
                kind: "VmNic",
                id: vm_nic_id,
                load_balancer_id: self.id,
            });
        }

        let provider_type = self
            .services
            .topology
            .lb_provider_for_nic(&nic)
            .await?
            .ok_or(LoadBalancerError::LbServiceNotEnabled {
                vm_nic_id,
                l3_network_id: nic.l3_network_id,
            })?;

        let chain = FlowChain::new("add-vm-nic")
            .then(
                AddVmNicStep::new("assign-provider-type", |ctx| {
                    Box::pin(ctx.assign_provider_type())
                })
                .with_rollback(|ctx| Box::pin(ctx.reset_provider_type())),
            )
            .then(
                AddVmNicStep::new("persist-vm-nic-ref", |ctx| Box::pin(ctx.persist_nic_ref()))
                    .with_rollback(|ctx| Box::pin(ctx.delete_nic_ref())),
            )
            .then(AddVmNicStep::new("backend-add-vm-nic", |ctx| {
                Box::pin(ctx.backend_add_vm_nic())
            }))
            .then(AddVmNicStep::new("activate-vm-nic-ref", |ctx| {
                Box::pin(ctx.activate_nic_ref())
            }));

        let mut ctx = AddVmNicFlow {
            base: self.clone(),
            nic_ref: VmNicRef::pending(self.id, vm_nic_id),
            nic,
            provider_type,
            assigned_provider: false,
        };
        chain.run(&mut ctx).await.map_err(FlowFailure::into_error)?;

        tracing::info!(%vm_nic_id, provider_type = %ctx.provider_type, "VM NIC attached");
        self.inventory().await
    }

    /// Detaches a VM NIC. Unknown NICs are a no-op.
    #[tracing::instrument(skip(self), fields(load_balancer_id = %self.id))]
    pub async fn remove_vm_nic(&self, vm_nic_id: ResourceId) -> Result<LoadBalancerInventory> {
        let lb = self.reload().await?;
        let Some(nic_ref) = self
            .services
            .store
            .find_vm_nic_ref(self.id, vm_nic_id)
            .await?
        else {
            tracing::debug!(%vm_nic_id, "VM NIC not attached, nothing to remove");
            return Ok(lb.inventory());
        };

        if lb.needs_action() {
            let nic = self.find_vm_nic(vm_nic_id).await?;
            let chain = FlowChain::new("remove-nic").then(RemoveVmNicStep::new(
                "backend-remove-vm-nic",
                |ctx| Box::pin(ctx.backend_remove_vm_nic()),
            ));
            let mut ctx = RemoveVmNicFlow {
                base: self.clone(),
                nic,
            };
            chain.run(&mut ctx).await.map_err(FlowFailure::into_error)?;
        }

        self.services.store.remove_vm_nic_ref(nic_ref.id).await?;
        tracing::info!(%vm_nic_id, "VM NIC detached");
        self.inventory().await
    }
}

type CreateListenerStep = Step<CreateListenerFlow, LoadBalancerError>;

struct CreateListenerFlow {
    base: LoadBalancerBase,
    listener: Listener,
}

impl CreateListenerFlow {
    async fn persist_listener(&mut self) -> Result<()> {
        self.base
            .services
            .store
            .insert_listener(&self.listener)
            .await?;
        Ok(())
    }

    async fn delete_listener(&mut self) {
        if let Err(error) = self.base.services.store.remove_listener(self.listener.id).await {
            tracing::warn!(listener_id = %self.listener.id, %error, "failed to delete listener");
        }
    }

    async fn backend_add_listener(&mut self) -> Result<()> {
        let lb = self.base.make_struct().await?;
        self.base
            .backend_for(&lb.load_balancer)?
            .add_listener(&lb, &self.listener)
            .await
            .map_err(LoadBalancerError::Backend)
    }
}

type DeleteListenerStep = Step<DeleteListenerFlow, LoadBalancerError>;

struct DeleteListenerFlow {
    base: LoadBalancerBase,
    listener: Listener,
}

impl DeleteListenerFlow {
    async fn backend_remove_listener(&mut self) -> Result<()> {
        let lb = self.base.make_struct().await?;
        self.base
            .backend_for(&lb.load_balancer)?
            .remove_listener(&lb, &self.listener)
            .await
            .map_err(LoadBalancerError::Backend)
    }
}

type AddVipStep = Step<AddVipFlow, LoadBalancerError>;

struct AddVipFlow {
    base: LoadBalancerBase,
    vip: Vip,
}

impl AddVipFlow {
    async fn lock_vip(&mut self) -> Result<()> {
        self.base
            .services
            .vip_manager
            .lock(&self.vip, LB_NETWORK_SERVICE_TYPE)
            .await
    }

    async fn unlock_vip(&mut self) {
        if let Err(error) = self.base.services.vip_manager.unlock(&self.vip).await {
            tracing::warn!(vip_id = %self.vip.id, %error, "failed to unlock VIP");
        }
    }

    async fn backend_add_vip(&mut self) -> Result<()> {
        let lb = self.base.make_struct().await?;
        self.base
            .backend_for(&lb.load_balancer)?
            .add_vip(&lb, &self.vip)
            .await
            .map_err(LoadBalancerError::Backend)
    }
}

type RemoveVipStep = Step<RemoveVipFlow, LoadBalancerError>;

struct RemoveVipFlow {
    base: LoadBalancerBase,
    vip: Vip,
}

impl RemoveVipFlow {
    async fn backend_remove_vip(&mut self) -> Result<()> {
        let lb = self.base.make_struct().await?;
        self.base
            .backend_for(&lb.load_balancer)?
            .remove_vip(&lb, &self.vip)
            .await
            .map_err(LoadBalancerError::Backend)
    }

    async fn unlock_vip(&mut self) -> Result<()> {
        self.base.services.vip_manager.unlock(&self.vip).await
    }
}

type AddVmNicStep = Step<AddVmNicFlow, LoadBalancerError>;

struct AddVmNicFlow {
    base: LoadBalancerBase,
    nic: VmNic,
    nic_ref: VmNicRef,
    /// Provider type serving the NIC's network.
    provider_type: String,
    /// Whether this flow bound the provider type and must undo it.
    assigned_provider: bool,
}

impl AddVmNicFlow {
    async fn assign_provider_type(&mut self) -> Result<()> {
        let lb = self.base.reload().await?;
        match lb.provider_type.as_deref() {
            None => {
                self.base
                    .services
                    .store
                    .update_provider_type(lb.id, Some(&self.provider_type))
                    .await?;
                self.assigned_provider = true;
                tracing::info!(provider_type = %self.provider_type, "provider type bound");
                Ok(())
            }
            Some(current) if current == self.provider_type => Ok(()),
            Some(current) => Err(LoadBalancerError::ProviderTypeMismatch {
                load_balancer_id: lb.id,
                current: current.to_string(),
                requested: self.provider_type.clone(),
            }),
        }
    }

    async fn reset_provider_type(&mut self) {
        if !self.assigned_provider {
            return;
        }
        let id = self.base.id;
        match self.base.services.store.update_provider_type(id, None).await {
            Ok(()) => self.assigned_provider = false,
            Err(error) => tracing::warn!(%error, "failed to reset provider type"),
        }
    }

    async fn persist_nic_ref(&mut self) -> Result<()> {
        self.base
            .services
            .store
            .insert_vm_nic_ref(&self.nic_ref)
            .await?;
        Ok(())
    }

    async fn delete_nic_ref(&mut self) {
        if let Err(error) = self.base.services.store.remove_vm_nic_ref(self.nic_ref.id).await {
            tracing::warn!(vm_nic_id = %self.nic.id, %error, "failed to delete VM NIC ref");
        }
    }

    async fn backend_add_vm_nic(&mut self) -> Result<()> {
        let lb = self.base.make_struct().await?;
        self.base
            .backend_for(&lb.load_balancer)?
            .add_vm_nic(&lb, &self.nic)
            .await
            .map_err(LoadBalancerError::Backend)
    }

    async fn activate_nic_ref(&mut self) -> Result<()> {
        let mut nic_ref = self.nic_ref.clone();
        nic_ref.activate()?;
        self.base
            .services
            .store
            .update_vm_nic_ref_status(nic_ref.id, nic_ref.status)
            .await?;
        self.nic_ref = nic_ref;
        Ok(())
    }
}

type RemoveVmNicStep = Step<RemoveVmNicFlow, LoadBalancerError>;

struct RemoveVmNicFlow {
    base: LoadBalancerBase,
    nic: VmNic,
}

impl RemoveVmNicFlow {
    async fn backend_remove_vm_nic(&mut self) -> Result<()> {
        let lb = self.base.make_struct().await?;
        self.base
            .backend_for(&lb.load_balancer)?
            .remove_vm_nic(&lb, &self.nic)
            .await
            .map_err(LoadBalancerError::Backend)
    }
}
