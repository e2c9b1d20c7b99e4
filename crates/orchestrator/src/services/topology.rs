//! Network topology resolution for VM NICs.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{LB_NETWORK_SERVICE_TYPE, VmNic};
use resource_store::ResourceStore;

use crate::error::{LoadBalancerError, Result};

/// Resolves which load balancer provider serves a VM NIC's network.
#[async_trait]
pub trait NetworkTopology: Send + Sync {
    /// Returns the provider type of the load balancer service on the NIC's
    /// L3 network, or `None` if that network has no such service.
    async fn lb_provider_for_nic(&self, nic: &VmNic) -> Result<Option<String>>;
}

/// Topology read from the L3 network rows in the resource store.
#[derive(Clone)]
pub struct StoreNetworkTopology {
    store: Arc<dyn ResourceStore>,
}

impl StoreNetworkTopology {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NetworkTopology for StoreNetworkTopology {
    async fn lb_provider_for_nic(&self, nic: &VmNic) -> Result<Option<String>> {
        let l3 = self
            .store
            .find_l3_network(nic.l3_network_id)
            .await?
            .ok_or_else(|| LoadBalancerError::not_found("L3Network", nic.l3_network_id))?;

        Ok(l3
            .provider_for(LB_NETWORK_SERVICE_TYPE)
            .map(str::to_string))
    }
}
