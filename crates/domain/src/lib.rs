//! Domain layer for the load balancer orchestrator.
//!
//! This crate provides the persisted shapes the orchestrator works on:
//! - The load balancer aggregate with its VIP refs, VM NIC refs and listeners
//! - The external resources it attaches (VIPs, VM NICs, L3 networks)
//! - The tagged command enum and the reply event published for each command

pub mod error;
pub mod loadbalancer;

pub use error::DomainError;
pub use loadbalancer::{
    CommandEnvelope, CommandId, CommandOutcome, CreateListener, L3Network,
    LB_NETWORK_SERVICE_TYPE, Listener, ListenerProtocol, LoadBalancer, LoadBalancerCommand,
    LoadBalancerEvent, LoadBalancerInventory, NetworkServiceRef, Port, Vip, VipRef, VmNic,
    VmNicRef, VmNicStatus,
};
