//! Load balancer backend trait, provider registry and in-memory backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::{AggregateId, ErrorCode, ResourceId};
use domain::{Listener, LoadBalancerInventory, Vip, VmNic};
use tokio::sync::watch;

use crate::error::{LoadBalancerError, Result};

/// Everything a backend needs to know about a load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerStruct {
    pub load_balancer: LoadBalancerInventory,
    /// VIPs attached through the load balancer's VIP refs.
    pub vips: Vec<Vip>,
    /// VM NICs attached through the load balancer's VM NIC refs.
    pub vm_nics: Vec<VmNic>,
}

impl LoadBalancerStruct {
    pub fn load_balancer_id(&self) -> AggregateId {
        self.load_balancer.id
    }
}

/// A provider that realizes load balancers on real infrastructure.
///
/// Failures carry an opaque [`ErrorCode`] that is handed to the caller as
/// is.
#[async_trait]
pub trait LoadBalancerBackend: Send + Sync {
    /// The provider type this backend serves.
    fn provider_type(&self) -> &str;

    async fn add_vip(&self, lb: &LoadBalancerStruct, vip: &Vip) -> std::result::Result<(), ErrorCode>;

    async fn remove_vip(
        &self,
        lb: &LoadBalancerStruct,
        vip: &Vip,
    ) -> std::result::Result<(), ErrorCode>;

    async fn add_vm_nic(
        &self,
        lb: &LoadBalancerStruct,
        nic: &VmNic,
    ) -> std::result::Result<(), ErrorCode>;

    async fn remove_vm_nic(
        &self,
        lb: &LoadBalancerStruct,
        nic: &VmNic,
    ) -> std::result::Result<(), ErrorCode>;

    async fn add_listener(
        &self,
        lb: &LoadBalancerStruct,
        listener: &Listener,
    ) -> std::result::Result<(), ErrorCode>;

    async fn remove_listener(
        &self,
        lb: &LoadBalancerStruct,
        listener: &Listener,
    ) -> std::result::Result<(), ErrorCode>;
}

/// Backends keyed by provider type.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn LoadBalancerBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend under its own provider type, replacing any
    /// previous one.
    pub fn register(&mut self, backend: Arc<dyn LoadBalancerBackend>) {
        self.backends
            .insert(backend.provider_type().to_string(), backend);
    }

    pub fn with(mut self, backend: Arc<dyn LoadBalancerBackend>) -> Self {
        self.register(backend);
        self
    }

    /// Looks up the backend for `provider_type`.
    pub fn get(&self, provider_type: &str) -> Result<Arc<dyn LoadBalancerBackend>> {
        self.backends
            .get(provider_type)
            .cloned()
            .ok_or_else(|| LoadBalancerError::NoBackend(provider_type.to_string()))
    }

    pub fn provider_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.backends.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("provider_types", &self.provider_types())
            .finish()
    }
}

/// The six backend operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOperation {
    AddVip,
    RemoveVip,
    AddVmNic,
    RemoveVmNic,
    AddListener,
    RemoveListener,
}

/// A call received by [`InMemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    pub operation: BackendOperation,
    pub load_balancer_id: AggregateId,
    pub resource_id: ResourceId,
    /// IDs of the VM NICs in the struct the call carried.
    pub vm_nic_ids: Vec<ResourceId>,
}

#[derive(Debug, Default)]
struct InMemoryBackendState {
    calls: Vec<BackendCall>,
    failures: HashMap<BackendOperation, ErrorCode>,
}

/// In-memory backend for testing and local runs.
///
/// Records every call, can be told to fail an operation with a given code,
/// and can hold calls until released.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    provider_type: String,
    state: Arc<Mutex<InMemoryBackendState>>,
    held: Arc<watch::Sender<bool>>,
    call_count: Arc<watch::Sender<usize>>,
}

impl InMemoryBackend {
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            state: Arc::default(),
            held: Arc::new(watch::channel(false).0),
            call_count: Arc::new(watch::channel(0).0),
        }
    }

    fn state(&self) -> MutexGuard<'_, InMemoryBackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `operation` fail with `code` until cleared.
    pub fn set_failure(&self, operation: BackendOperation, code: ErrorCode) {
        self.state().failures.insert(operation, code);
    }

    pub fn clear_failure(&self, operation: BackendOperation) {
        self.state().failures.remove(&operation);
    }

    /// Parks every subsequent call until [`release`](Self::release).
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Returns every call received so far, including held ones.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn calls_for(&self, operation: BackendOperation) -> Vec<BackendCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    /// Waits until at least `n` calls have been received.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.call_count.subscribe();
        // The sender lives as long as self, so this only ends once satisfied.
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    async fn handle(
        &self,
        operation: BackendOperation,
        lb: &LoadBalancerStruct,
        resource_id: ResourceId,
    ) -> std::result::Result<(), ErrorCode> {
        let count = {
            let mut state = self.state();
            state.calls.push(BackendCall {
                operation,
                load_balancer_id: lb.load_balancer_id(),
                resource_id,
                vm_nic_ids: lb.vm_nics.iter().map(|n| n.id).collect(),
            });
            state.calls.len()
        };
        self.call_count.send_replace(count);
        tracing::debug!(?operation, %resource_id, provider = %self.provider_type, "backend call");

        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        match self.state().failures.get(&operation) {
            Some(code) => Err(code.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LoadBalancerBackend for InMemoryBackend {
    fn provider_type(&self) -> &str {
        &self.provider_type
    }

    async fn add_vip(&self, lb: &LoadBalancerStruct, vip: &Vip) -> std::result::Result<(), ErrorCode> {
        self.handle(BackendOperation::AddVip, lb, vip.id).await
    }

    async fn remove_vip(
        &self,
        lb: &LoadBalancerStruct,
        vip: &Vip,
    ) -> std::result::Result<(), ErrorCode> {
        self.handle(BackendOperation::RemoveVip, lb, vip.id).await
    }

    async fn add_vm_nic(
        &self,
        lb: &LoadBalancerStruct,
        nic: &VmNic,
    ) -> std::result::Result<(), ErrorCode> {
        self.handle(BackendOperation::AddVmNic, lb, nic.id).await
    }

    async fn remove_vm_nic(
        &self,
        lb: &LoadBalancerStruct,
        nic: &VmNic,
    ) -> std::result::Result<(), ErrorCode> {
        self.handle(BackendOperation::RemoveVmNic, lb, nic.id).await
    }

    async fn add_listener(
        &self,
        lb: &LoadBalancerStruct,
        listener: &Listener,
    ) -> std::result::Result<(), ErrorCode> {
        self.handle(BackendOperation::AddListener, lb, listener.id)
            .await
    }

    async fn remove_listener(
        &self,
        lb: &LoadBalancerStruct,
        listener: &Listener,
    ) -> std::result::Result<(), ErrorCode> {
        self.handle(BackendOperation::RemoveListener, lb, listener.id)
            .await
    }
}
