//! Cross-chain operation coordination
//!
//! The coordination layer:
//! 1. Plans which of swap/bridge a request needs and orders the steps
//! 2. Guarantees the relay wallet can pay gas before any step runs
//! 3. Executes steps strictly in plan order, halting on the first failure
//! 4. Holds each relay wallet for one flow at a time

pub mod engine;
pub mod executor;
pub mod funding;
pub mod lease;
pub mod plan;
pub mod planner;
pub mod progress;
pub mod retry;

pub use engine::{Orchestrator, PreparedFlow};
pub use executor::{CompletedStep, ExecutionServices, ExecutorConfig, StepExecutor, TerminalResult};
pub use funding::{FundingGuard, FundingReceipt, RelayWalletState};
pub use lease::{RelayLease, RelayLocks};
pub use plan::{
    Asset, ChainId, FlowMode, FlowRequest, FundingTier, FundingTiers, OperationPlan, Route,
    StepId, StepSpec,
};
pub use planner::OperationPlanner;
pub use progress::{ProgressTracker, StepState, StepStatus};
pub use retry::{PollOutcome, RetryPolicy};
