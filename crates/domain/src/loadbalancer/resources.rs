//! External resources a load balancer attaches but does not own.

use common::ResourceId;
use serde::{Deserialize, Serialize};

/// A virtual IP address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vip {
    pub id: ResourceId,
    pub name: String,
    pub ip: String,
    pub l3_network_id: ResourceId,
    /// Provider type the VIP is bound to, if any.
    pub service_provider: Option<String>,
    /// Network service currently holding the VIP lock.
    pub use_for: Option<String>,
}

impl Vip {
    pub fn new(name: impl Into<String>, ip: impl Into<String>, l3_network_id: ResourceId) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            ip: ip.into(),
            l3_network_id,
            service_provider: None,
            use_for: None,
        }
    }

    pub fn with_service_provider(mut self, provider_type: impl Into<String>) -> Self {
        self.service_provider = Some(provider_type.into());
        self
    }

    /// Returns true if the VIP may be locked for `use_for`.
    pub fn is_available_for(&self, use_for: &str) -> bool {
        self.use_for.as_deref().is_none_or(|current| current == use_for)
    }
}

/// A VM network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmNic {
    pub id: ResourceId,
    pub vm_instance_id: ResourceId,
    pub l3_network_id: ResourceId,
    pub ip: Option<String>,
    pub mac: String,
}

impl VmNic {
    pub fn new(vm_instance_id: ResourceId, l3_network_id: ResourceId, mac: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(),
            vm_instance_id,
            l3_network_id,
            ip: None,
            mac: mac.into(),
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
}

/// A network service enabled on an L3 network and the provider serving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkServiceRef {
    pub service_type: String,
    pub provider_type: String,
}

/// An L3 network and the network services enabled on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L3Network {
    pub id: ResourceId,
    pub name: String,
    pub network_services: Vec<NetworkServiceRef>,
}

impl L3Network {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            network_services: Vec::new(),
        }
    }

    /// Enables `service_type` on this network, served by `provider_type`.
    pub fn with_service(
        mut self,
        service_type: impl Into<String>,
        provider_type: impl Into<String>,
    ) -> Self {
        self.network_services.push(NetworkServiceRef {
            service_type: service_type.into(),
            provider_type: provider_type.into(),
        });
        self
    }

    /// Returns the provider type serving `service_type`, if enabled.
    pub fn provider_for(&self, service_type: &str) -> Option<&str> {
        self.network_services
            .iter()
            .find(|s| s.service_type == service_type)
            .map(|s| s.provider_type.as_str())
    }
}
