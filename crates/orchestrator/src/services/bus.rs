//! Reply publication.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::ErrorCode;
use domain::{CommandEnvelope, CommandId, LoadBalancerEvent};
use tokio::sync::broadcast;

/// Outbound channel for command replies.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a reply event.
    async fn publish(&self, event: LoadBalancerEvent);

    /// Replies to a command no handler claims, and returns that reply.
    async fn deal_with_unknown_message(&self, envelope: &CommandEnvelope) -> LoadBalancerEvent;
}

const CHANNEL_CAPACITY: usize = 1024;

/// In-process bus fanning replies out to subscribers and keeping a log.
#[derive(Clone)]
pub struct InMemoryMessageBus {
    sender: broadcast::Sender<LoadBalancerEvent>,
    log: Arc<Mutex<Vec<LoadBalancerEvent>>>,
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            log: Arc::default(),
        }
    }

    fn log(&self) -> MutexGuard<'_, Vec<LoadBalancerEvent>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes to replies published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LoadBalancerEvent> {
        self.sender.subscribe()
    }

    /// Returns every reply published so far.
    pub fn published(&self) -> Vec<LoadBalancerEvent> {
        self.log().clone()
    }

    /// Returns the replies correlated to `command_id`.
    pub fn replies_to(&self, command_id: CommandId) -> Vec<LoadBalancerEvent> {
        self.log()
            .iter()
            .filter(|e| e.correlation_id == command_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, event: LoadBalancerEvent) {
        tracing::debug!(
            correlation_id = %event.correlation_id,
            command = %event.command,
            success = event.is_success(),
            "publishing reply"
        );
        self.log().push(event.clone());
        // No subscribers is fine; the log still has it.
        let _ = self.sender.send(event);
    }

    async fn deal_with_unknown_message(&self, envelope: &CommandEnvelope) -> LoadBalancerEvent {
        tracing::warn!(
            command = envelope.command.name(),
            load_balancer_id = %envelope.load_balancer_id,
            "no handler for command"
        );
        let event = LoadBalancerEvent::failure(
            envelope,
            ErrorCode::new(
                ErrorCode::UNKNOWN_MESSAGE,
                format!("no handler for command {}", envelope.command.name()),
            ),
        );
        self.publish(event.clone()).await;
        event
    }
}
