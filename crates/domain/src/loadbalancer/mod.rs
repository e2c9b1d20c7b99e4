//! Load balancer aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod resources;
mod state;
mod value_objects;

pub use aggregate::{Listener, LoadBalancer, LoadBalancerInventory, VipRef, VmNicRef};
pub use commands::{CommandEnvelope, CommandId, CreateListener, LoadBalancerCommand};
pub use events::{CommandOutcome, LoadBalancerEvent};
pub use resources::{L3Network, NetworkServiceRef, Vip, VmNic};
pub use state::VmNicStatus;
pub use value_objects::{ListenerProtocol, Port};

/// Network service type under which L3 networks advertise load balancing,
/// and the `useFor` tag written on VIPs locked by this service.
pub const LB_NETWORK_SERVICE_TYPE: &str = "LoadBalancer";
