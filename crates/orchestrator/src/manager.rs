//! Command entry point.
//!
//! Every command is queued under its load balancer's key, run by
//! [`LoadBalancerBase`], and answered with exactly one
//! [`LoadBalancerEvent`] on the message bus.

use std::time::Instant;

use common::AggregateId;
use domain::{
    CommandEnvelope, CommandId, LoadBalancer, LoadBalancerCommand, LoadBalancerEvent,
    LoadBalancerInventory,
};
use tokio::sync::oneshot;

use crate::base::LoadBalancerBase;
use crate::error::{LoadBalancerError, Result};
use crate::queue::{QueueConfig, SerializedTaskQueue};
use crate::services::LoadBalancerServices;

/// Queue key shared by every mutating operation on one load balancer.
pub fn sync_signature(load_balancer_id: AggregateId) -> String {
    format!("operate-lb-{load_balancer_id}")
}

/// Accepts load balancer commands and runs them one at a time per load
/// balancer.
#[derive(Clone)]
pub struct LoadBalancerManager {
    services: LoadBalancerServices,
    queue: SerializedTaskQueue,
}

impl LoadBalancerManager {
    pub fn new(services: LoadBalancerServices, config: QueueConfig) -> Self {
        Self {
            services,
            queue: SerializedTaskQueue::new(config),
        }
    }

    pub fn services(&self) -> &LoadBalancerServices {
        &self.services
    }

    pub fn queue(&self) -> &SerializedTaskQueue {
        &self.queue
    }

    /// Creates an empty load balancer with no provider type.
    #[tracing::instrument(skip(self, description))]
    pub async fn create_load_balancer(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<LoadBalancerInventory> {
        let lb = LoadBalancer::new(name, description)?;
        self.services.store.insert_load_balancer(&lb).await?;

        tracing::info!(load_balancer_id = %lb.id, "load balancer created");
        Ok(lb.inventory())
    }

    /// Reads the current inventory without going through the queue.
    pub async fn get_inventory(&self, id: AggregateId) -> Result<LoadBalancerInventory> {
        let lb = LoadBalancerBase::new(self.services.clone(), id).reload().await?;
        Ok(lb.inventory())
    }

    /// Lists every load balancer, oldest first.
    pub async fn list_inventories(&self) -> Result<Vec<LoadBalancerInventory>> {
        let lbs = self.services.store.list_load_balancers().await?;
        Ok(lbs.iter().map(LoadBalancer::inventory).collect())
    }

    /// Queues a command. The reply is only published on the bus.
    pub fn submit(&self, envelope: CommandEnvelope) -> CommandId {
        let id = envelope.id;
        self.enqueue(envelope, None);
        id
    }

    /// Queues a command and waits for its reply.
    pub async fn execute(&self, envelope: CommandEnvelope) -> Result<LoadBalancerEvent> {
        let load_balancer_id = envelope.load_balancer_id;
        let (reply, rx) = oneshot::channel();
        self.enqueue(envelope, Some(reply));
        rx.await
            .map_err(|_| LoadBalancerError::NoReply(load_balancer_id))
    }

    fn enqueue(&self, envelope: CommandEnvelope, reply: Option<oneshot::Sender<LoadBalancerEvent>>) {
        let services = self.services.clone();
        let key = sync_signature(envelope.load_balancer_id);
        let name = envelope.command.name();

        self.queue.submit(key, name, move |chain| async move {
            let event = handle_command(&services, &envelope).await;
            if let Some(reply) = reply {
                let _ = reply.send(event);
            }
            chain.next();
        });
    }
}

#[tracing::instrument(
    skip_all,
    fields(
        command_id = %envelope.id,
        load_balancer_id = %envelope.load_balancer_id,
        operation = envelope.command.name(),
    )
)]
async fn handle_command(
    services: &LoadBalancerServices,
    envelope: &CommandEnvelope,
) -> LoadBalancerEvent {
    let operation = envelope.command.name();
    metrics::counter!("lb_operations_total", "operation" => operation).increment(1);
    let start = Instant::now();
    tracing::info!("operation started");

    let base = LoadBalancerBase::new(services.clone(), envelope.load_balancer_id);
    let result = match &envelope.command {
        LoadBalancerCommand::CreateListener(cmd) => base.create_listener(cmd.clone()).await,
        LoadBalancerCommand::DeleteListener { listener_id } => {
            base.delete_listener(*listener_id).await
        }
        LoadBalancerCommand::AddVip { vip_id } => base.add_vip(*vip_id).await,
        LoadBalancerCommand::RemoveVip { vip_id } => base.remove_vip(*vip_id).await,
        LoadBalancerCommand::AddVmNic { vm_nic_id } => base.add_vm_nic(*vm_nic_id).await,
        LoadBalancerCommand::RemoveVmNic { vm_nic_id } => base.remove_vm_nic(*vm_nic_id).await,
        LoadBalancerCommand::DeleteLoadBalancer => {
            return services.bus.deal_with_unknown_message(envelope).await;
        }
    };

    metrics::histogram!("lb_operation_duration_seconds", "operation" => operation)
        .record(start.elapsed().as_secs_f64());

    let event = match result {
        Ok(inventory) => {
            tracing::info!("operation succeeded");
            LoadBalancerEvent::success(envelope, inventory)
        }
        Err(error) => {
            metrics::counter!("lb_operation_failures_total", "operation" => operation)
                .increment(1);
            match &error {
                LoadBalancerError::Backend(_) => tracing::warn!(%error, "backend rejected operation"),
                e if e.is_validation() => tracing::warn!(%error, "operation rejected"),
                _ => tracing::error!(%error, "operation failed"),
            }
            LoadBalancerEvent::failure(envelope, error.to_error_code())
        }
    };

    services.bus.publish(event.clone()).await;
    event
}
