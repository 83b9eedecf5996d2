//! In-memory flow registry fed from the progress stream
//!
//! Nothing here survives a restart. A flow's record is created when the API
//! accepts it and is then kept current by applying every progress event.
//! Finished records are evicted after a retention window, and the oldest
//! finished records go first once the registry is over capacity.

use crate::coordination::{FlowMode, OperationPlan, StepId, StepState, TerminalResult};
use crate::events::{ProgressEvent, ProgressKind};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ethers::types::TxHash;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Running,
    Completed,
    Failed,
}

/// Latest known state of one flow
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRecord {
    pub flow_id: Uuid,
    pub mode: FlowMode,
    pub status: FlowStatus,
    pub plan: Arc<OperationPlan>,
    pub steps: Arc<[StepState]>,
    pub funding_tx_hash: Option<TxHash>,
    pub funding_verified: Option<bool>,
    pub failed_step: Option<StepId>,
    pub cause: Option<String>,
    pub result: Option<Arc<TerminalResult>>,
    pub updated_at: DateTime<Utc>,
}

impl FlowRecord {
    fn new(flow_id: Uuid, plan: Arc<OperationPlan>) -> Self {
        Self {
            flow_id,
            mode: plan.mode,
            status: FlowStatus::Running,
            steps: plan.steps.iter().map(StepState::pending).collect(),
            plan,
            funding_tx_hash: None,
            funding_verified: None,
            failed_step: None,
            cause: None,
            result: None,
            updated_at: Utc::now(),
        }
    }
}

/// Finished records kept at most this long
const DEFAULT_RETENTION_SECS: i64 = 3600;
const DEFAULT_CAPACITY: usize = 1024;

pub struct FlowRegistry {
    flows: DashMap<Uuid, FlowRecord>,
    retention: Duration,
    capacity: usize,
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::with_limits(Duration::seconds(DEFAULT_RETENTION_SECS), DEFAULT_CAPACITY)
    }
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry keeping finished flows for `retention`, holding at most
    /// `capacity` records unless more than that are still running
    pub fn with_limits(retention: Duration, capacity: usize) -> Self {
        Self {
            flows: DashMap::new(),
            retention,
            capacity,
        }
    }

    /// Record an accepted flow before its first event arrives
    pub fn register(&self, flow_id: Uuid, plan: Arc<OperationPlan>) {
        self.flows
            .entry(flow_id)
            .or_insert_with(|| FlowRecord::new(flow_id, plan));
    }

    pub fn get(&self, flow_id: Uuid) -> Option<FlowRecord> {
        self.flows.get(&flow_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn apply(&self, event: &ProgressEvent) {
        if let ProgressKind::FlowStarted { plan } = &event.kind {
            self.register(event.flow_id, plan.clone());
        }

        {
            let Some(mut record) = self.flows.get_mut(&event.flow_id) else {
                debug!("Ignoring {} for untracked flow {}", event.kind.name(), event.flow_id);
                return;
            };
            if record.status != FlowStatus::Running {
                return;
            }
            Self::update(&mut record, event);
        }

        if matches!(
            event.kind,
            ProgressKind::FlowCompleted { .. } | ProgressKind::FlowFailed { .. }
        ) {
            self.prune(Utc::now());
        }
    }

    /// Settle a flow from the value its execution returned.
    ///
    /// Covers a feeder that lagged past the terminal event; records that
    /// already reached a terminal status are left alone.
    pub fn finish(&self, flow_id: Uuid, outcome: Result<Arc<TerminalResult>, String>) {
        {
            let Some(mut record) = self.flows.get_mut(&flow_id) else {
                return;
            };
            if record.status != FlowStatus::Running {
                return;
            }

            match outcome {
                Ok(result) => {
                    record.status = if result.success {
                        FlowStatus::Completed
                    } else {
                        FlowStatus::Failed
                    };
                    record.failed_step = result.failed_step_id;
                    record.cause = result.cause.clone();
                    record.steps = result.steps.clone();
                    record.result = Some(result);
                }
                Err(cause) => {
                    record.status = FlowStatus::Failed;
                    record.cause = Some(cause);
                }
            }
            record.updated_at = Utc::now();
            debug!("Flow {} settled from its execution result", flow_id);
        }

        self.prune(Utc::now());
    }

    /// Drop finished records older than the retention window, then the
    /// oldest finished ones while over capacity. Running flows are kept.
    pub fn prune(&self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        self.flows
            .retain(|_, record| record.status == FlowStatus::Running || record.updated_at >= cutoff);

        let excess = self.flows.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }

        let mut finished: Vec<(DateTime<Utc>, Uuid)> = self
            .flows
            .iter()
            .filter(|r| r.status != FlowStatus::Running)
            .map(|r| (r.updated_at, r.flow_id))
            .collect();
        finished.sort_unstable();

        for (_, flow_id) in finished.into_iter().take(excess) {
            self.flows.remove(&flow_id);
        }
    }

    fn update(record: &mut FlowRecord, event: &ProgressEvent) {
        match &event.kind {
            ProgressKind::FlowStarted { .. }
            | ProgressKind::FundingStarted { .. }
            | ProgressKind::FundingAttempt { .. } => {}
            ProgressKind::FundingCompleted { tx_hash, verified } => {
                record.funding_tx_hash = *tx_hash;
                record.funding_verified = Some(*verified);
            }
            ProgressKind::StepUpdated { steps, .. } => {
                record.steps = steps.clone();
            }
            ProgressKind::FlowCompleted { result } => {
                record.status = FlowStatus::Completed;
                record.steps = result.steps.clone();
                record.result = Some(result.clone());
            }
            ProgressKind::FlowFailed { failed_step, cause } => {
                record.status = FlowStatus::Failed;
                record.failed_step = *failed_step;
                record.cause = Some(cause.clone());
            }
        }

        record.updated_at = event.at;
    }

    /// Apply events from `rx` until the channel closes
    pub fn spawn_feeder(self: Arc<Self>, mut rx: broadcast::Receiver<ProgressEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.apply(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Flow registry lagged, skipped {} progress events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
