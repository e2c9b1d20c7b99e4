//! Collaborators the lifecycle operations depend on, with default
//! implementations.

pub mod backend;
pub mod bus;
pub mod topology;
pub mod vip;

use std::sync::Arc;

use resource_store::ResourceStore;

pub use backend::{
    BackendCall, BackendOperation, BackendRegistry, InMemoryBackend, LoadBalancerBackend,
    LoadBalancerStruct,
};
pub use bus::{InMemoryMessageBus, MessageBus};
pub use topology::{NetworkTopology, StoreNetworkTopology};
pub use vip::{StoreVipManager, VipManager};

/// Every collaborator an operation needs, built once at startup.
#[derive(Clone)]
pub struct LoadBalancerServices {
    pub store: Arc<dyn ResourceStore>,
    pub vip_manager: Arc<dyn VipManager>,
    pub backends: Arc<BackendRegistry>,
    pub topology: Arc<dyn NetworkTopology>,
    pub bus: Arc<dyn MessageBus>,
}

impl LoadBalancerServices {
    /// Wires the store-backed VIP manager and topology resolver around
    /// `store`.
    pub fn from_store(
        store: Arc<dyn ResourceStore>,
        backends: BackendRegistry,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            vip_manager: Arc::new(StoreVipManager::new(store.clone())),
            topology: Arc::new(StoreNetworkTopology::new(store.clone())),
            backends: Arc::new(backends),
            store,
            bus,
        }
    }
}
