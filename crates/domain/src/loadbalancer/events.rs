//! Reply events published for load balancer commands.

use chrono::{DateTime, Utc};
use common::{AggregateId, ErrorCode};
use serde::{Deserialize, Serialize};

use super::{CommandEnvelope, CommandId, LoadBalancerInventory};

/// Terminal outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Success { inventory: LoadBalancerInventory },
    Failure { error: ErrorCode },
}

/// The single reply published for every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerEvent {
    /// ID of the command this event answers.
    pub correlation_id: CommandId,
    pub load_balancer_id: AggregateId,
    /// Task name of the command.
    pub command: String,
    pub outcome: CommandOutcome,
    pub timestamp: DateTime<Utc>,
}

impl LoadBalancerEvent {
    /// Creates a success reply carrying the reloaded inventory.
    pub fn success(envelope: &CommandEnvelope, inventory: LoadBalancerInventory) -> Self {
        Self::with_outcome(envelope, CommandOutcome::Success { inventory })
    }

    /// Creates a failure reply carrying an error code.
    pub fn failure(envelope: &CommandEnvelope, error: ErrorCode) -> Self {
        Self::with_outcome(envelope, CommandOutcome::Failure { error })
    }

    fn with_outcome(envelope: &CommandEnvelope, outcome: CommandOutcome) -> Self {
        Self {
            correlation_id: envelope.id,
            load_balancer_id: envelope.load_balancer_id,
            command: envelope.command.name().to_string(),
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CommandOutcome::Success { .. })
    }

    pub fn inventory(&self) -> Option<&LoadBalancerInventory> {
        match &self.outcome {
            CommandOutcome::Success { inventory } => Some(inventory),
            CommandOutcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorCode> {
        match &self.outcome {
            CommandOutcome::Success { .. } => None,
            CommandOutcome::Failure { error } => Some(error),
        }
    }
}
