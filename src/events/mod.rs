//! Progress event stream
//!
//! Every flow publishes its lifecycle on a broadcast channel. Subscribers
//! (the flow registry, log sinks, tests) observe the same ordered sequence
//! the executor produced.

use crate::coordination::{OperationPlan, StepId, StepState, TerminalResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, TxHash, U256};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Capacity of the progress broadcast channel
pub const PROGRESS_CHANNEL_CAPACITY: usize = 1024;

/// A single progress notification for one flow
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub flow_id: Uuid,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressKind {
    /// Plan accepted, steps materialized as pending
    FlowStarted { plan: Arc<OperationPlan> },

    /// Relay wallet below minimum, top-up about to be sent
    FundingStarted {
        relay: Address,
        chain_id: u64,
        amount: U256,
    },

    /// One balance observation of the verification loop
    FundingAttempt {
        attempt: u32,
        max_attempts: u32,
        balance: Option<U256>,
    },

    /// Funding guard finished
    FundingCompleted {
        tx_hash: Option<TxHash>,
        verified: bool,
    },

    /// A step changed status; `steps` is the full list after the change
    StepUpdated {
        step: StepId,
        steps: Arc<[StepState]>,
    },

    FlowCompleted { result: Arc<TerminalResult> },

    FlowFailed {
        failed_step: Option<StepId>,
        cause: String,
    },
}

impl ProgressKind {
    /// Get event name for metrics and logs
    pub fn name(&self) -> &'static str {
        match self {
            ProgressKind::FlowStarted { .. } => "flow_started",
            ProgressKind::FundingStarted { .. } => "funding_started",
            ProgressKind::FundingAttempt { .. } => "funding_attempt",
            ProgressKind::FundingCompleted { .. } => "funding_completed",
            ProgressKind::StepUpdated { .. } => "step_updated",
            ProgressKind::FlowCompleted { .. } => "flow_completed",
            ProgressKind::FlowFailed { .. } => "flow_failed",
        }
    }

    /// Whether no further events follow for this flow
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressKind::FlowCompleted { .. } | ProgressKind::FlowFailed { .. }
        )
    }
}

/// Per-flow handle onto the shared progress channel
#[derive(Debug, Clone)]
pub struct ProgressSink {
    flow_id: Uuid,
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressSink {
    pub fn new(flow_id: Uuid, tx: broadcast::Sender<ProgressEvent>) -> Self {
        Self { flow_id, tx }
    }

    /// Sink with its own channel, returning the receiving side
    pub fn detached(flow_id: Uuid) -> (Self, broadcast::Receiver<ProgressEvent>) {
        let (tx, rx) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        (Self::new(flow_id, tx), rx)
    }

    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, kind: ProgressKind) {
        trace!(flow_id = %self.flow_id, event = kind.name(), "progress");

        let _ = self.tx.send(ProgressEvent {
            flow_id: self.flow_id,
            at: Utc::now(),
            kind,
        });
    }
}
