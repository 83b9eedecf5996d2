//! Per-flow step state machine
//!
//! Enforces the ordering rules of a flow: at most one step is processing, a
//! step only starts after every earlier step completed, and nothing starts
//! once a step has failed. Each update swaps in a fresh snapshot and
//! publishes it on the progress stream.

use super::plan::{OperationPlan, StepId, StepSpec};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{ProgressKind, ProgressSink};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Processing => "processing",
            StepStatus::Completed => "completed",
            StepStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub id: StepId,
    pub title: String,
    pub description: String,
    pub status: StepStatus,
    pub tx_hash: Option<String>,
}

impl StepState {
    pub fn pending(spec: &StepSpec) -> Self {
        Self {
            id: spec.id,
            title: spec.title.clone(),
            description: spec.description.clone(),
            status: StepStatus::Pending,
            tx_hash: None,
        }
    }
}

pub struct ProgressTracker {
    sink: ProgressSink,
    steps: Arc<[StepState]>,
}

impl ProgressTracker {
    /// Materialize every planned step as pending
    pub fn new(plan: &OperationPlan, sink: ProgressSink) -> Self {
        let steps = plan.steps.iter().map(StepState::pending).collect();

        Self { sink, steps }
    }

    pub fn snapshot(&self) -> Arc<[StepState]> {
        self.steps.clone()
    }

    pub fn status(&self, id: StepId) -> Option<StepStatus> {
        self.steps.iter().find(|s| s.id == id).map(|s| s.status)
    }

    pub fn start(&mut self, id: StepId) -> OrchestratorResult<()> {
        let index = self.index_of(id)?;

        let blocked = self.steps.iter().any(|s| {
            matches!(s.status, StepStatus::Processing | StepStatus::Error)
        }) || self.steps[..index]
            .iter()
            .any(|s| s.status != StepStatus::Completed);

        if blocked || self.steps[index].status != StepStatus::Pending {
            return Err(self.invalid(index, StepStatus::Processing));
        }

        self.replace(index, StepStatus::Processing, None);
        Ok(())
    }

    pub fn complete(&mut self, id: StepId, tx_hash: Option<String>) -> OrchestratorResult<()> {
        let index = self.index_of(id)?;
        if self.steps[index].status != StepStatus::Processing {
            return Err(self.invalid(index, StepStatus::Completed));
        }

        self.replace(index, StepStatus::Completed, tx_hash);
        Ok(())
    }

    pub fn fail(&mut self, id: StepId) -> OrchestratorResult<()> {
        let index = self.index_of(id)?;
        if self.steps[index].status != StepStatus::Processing {
            return Err(self.invalid(index, StepStatus::Error));
        }

        self.replace(index, StepStatus::Error, None);
        Ok(())
    }

    fn index_of(&self, id: StepId) -> OrchestratorResult<usize> {
        self.steps
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| OrchestratorError::Internal(format!("step {} is not in the plan", id)))
    }

    fn invalid(&self, index: usize, to: StepStatus) -> OrchestratorError {
        OrchestratorError::InvalidStateTransition {
            step: self.steps[index].id,
            from: self.steps[index].status.to_string(),
            to: to.to_string(),
        }
    }

    /// Build a new list with one entry changed; earlier snapshots stay valid
    fn replace(&mut self, index: usize, status: StepStatus, tx_hash: Option<String>) {
        let mut next = self.steps.to_vec();
        next[index].status = status;
        if tx_hash.is_some() {
            next[index].tx_hash = tx_hash;
        }
        self.steps = next.into();

        self.sink.emit(ProgressKind::StepUpdated {
            step: self.steps[index].id,
            steps: self.steps.clone(),
        });
    }
}
