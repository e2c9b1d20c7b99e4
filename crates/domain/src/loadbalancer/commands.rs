//! Load balancer commands.

use common::{AggregateId, ResourceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

use super::{ListenerProtocol, Port};

/// Unique identifier for a submitted command; replies carry it back as
/// their correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Creates a new random command ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command to create a listener on a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateListener {
    /// Listener ID to use; generated when absent.
    pub resource_id: Option<ResourceId>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Port the backend instances listen on.
    pub instance_port: Port,
    /// Port exposed on the VIP.
    pub load_balancer_port: Port,
    pub protocol: ListenerProtocol,
}

impl CreateListener {
    /// Creates a new CreateListener command, validating ports and protocol.
    pub fn new(
        instance_port: i64,
        load_balancer_port: i64,
        protocol: &str,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            resource_id: None,
            name: None,
            description: None,
            instance_port: Port::new(instance_port)?,
            load_balancer_port: Port::new(load_balancer_port)?,
            protocol: protocol.parse()?,
        })
    }

    pub fn with_resource_id(mut self, resource_id: ResourceId) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Every command the orchestrator accepts for an existing load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LoadBalancerCommand {
    CreateListener(CreateListener),
    DeleteListener { listener_id: ResourceId },
    AddVip { vip_id: ResourceId },
    RemoveVip { vip_id: ResourceId },
    AddVmNic { vm_nic_id: ResourceId },
    RemoveVmNic { vm_nic_id: ResourceId },
    DeleteLoadBalancer,
}

impl LoadBalancerCommand {
    /// Returns the task name used for logging and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            LoadBalancerCommand::CreateListener(_) => "create-listener",
            LoadBalancerCommand::DeleteListener { .. } => "delete-listener",
            LoadBalancerCommand::AddVip { .. } => "add-vip",
            LoadBalancerCommand::RemoveVip { .. } => "remove-vip",
            LoadBalancerCommand::AddVmNic { .. } => "add-vm-nic",
            LoadBalancerCommand::RemoveVmNic { .. } => "remove-nic",
            LoadBalancerCommand::DeleteLoadBalancer => "delete-lb",
        }
    }
}

/// A command addressed to one load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: CommandId,
    pub load_balancer_id: AggregateId,
    pub command: LoadBalancerCommand,
}

impl CommandEnvelope {
    /// Wraps a command with a fresh command ID.
    pub fn new(load_balancer_id: AggregateId, command: LoadBalancerCommand) -> Self {
        Self {
            id: CommandId::new(),
            load_balancer_id,
            command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_listener_validates_input() {
        let cmd = CreateListener::new(8080, 80, "tcp").unwrap();
        assert_eq!(cmd.instance_port.get(), 8080);
        assert_eq!(cmd.load_balancer_port.get(), 80);
        assert_eq!(cmd.protocol, ListenerProtocol::Tcp);
        assert!(cmd.resource_id.is_none());

        assert!(matches!(
            CreateListener::new(0, 80, "tcp"),
            Err(DomainError::InvalidPort { value: 0 })
        ));
        assert!(matches!(
            CreateListener::new(8080, 80, "sctp"),
            Err(DomainError::UnsupportedProtocol { .. })
        ));
    }

    #[test]
    fn test_command_names() {
        let id = ResourceId::new();
        assert_eq!(
            LoadBalancerCommand::AddVmNic { vm_nic_id: id }.name(),
            "add-vm-nic"
        );
        assert_eq!(
            LoadBalancerCommand::RemoveVmNic { vm_nic_id: id }.name(),
            "remove-nic"
        );
        assert_eq!(LoadBalancerCommand::DeleteLoadBalancer.name(), "delete-lb");
    }

    #[test]
    fn test_command_serialization_is_tagged() {
        let vip_id = ResourceId::new();
        let json = serde_json::to_value(LoadBalancerCommand::AddVip { vip_id }).unwrap();
        assert_eq!(json["type"], "AddVip");
        assert_eq!(json["data"]["vip_id"], vip_id.to_string());
    }

    #[test]
    fn test_envelopes_get_distinct_ids() {
        let lb = AggregateId::new();
        let a = CommandEnvelope::new(lb, LoadBalancerCommand::DeleteLoadBalancer);
        let b = CommandEnvelope::new(lb, LoadBalancerCommand::DeleteLoadBalancer);
        assert_ne!(a.id, b.id);
    }
}
