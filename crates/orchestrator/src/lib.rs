//! Load balancer lifecycle orchestration.
//!
//! Commands against a load balancer are serialized per load balancer by the
//! [`SerializedTaskQueue`] and executed by [`LoadBalancerBase`], which runs
//! each multi-step operation as a saga so that a failed backend call unwinds
//! the steps before it. Replies go out through the [`MessageBus`].
//!
//! The collaborators an operation needs are bundled in
//! [`LoadBalancerServices`]; the [`services`] module ships in-memory and
//! store-backed implementations of each.

pub mod base;
pub mod error;
pub mod manager;
pub mod queue;
pub mod services;

pub use base::LoadBalancerBase;
pub use error::{LoadBalancerError, Result};
pub use manager::{LoadBalancerManager, sync_signature};
pub use queue::{DEFAULT_IDLE_TIMEOUT, QueueConfig, SerializedTaskQueue, TaskChain};
pub use services::{
    BackendCall, BackendOperation, BackendRegistry, InMemoryBackend, InMemoryMessageBus,
    LoadBalancerBackend, LoadBalancerServices, LoadBalancerStruct, MessageBus, NetworkTopology,
    StoreNetworkTopology, StoreVipManager, VipManager,
};
