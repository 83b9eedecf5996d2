//! Orchestrator facade: plan, fund, execute

use super::executor::{StepExecutor, TerminalResult};
use super::funding::{FundingGuard, FundingReceipt, RelayWalletState};
use super::lease::{RelayLease, RelayLocks};
use super::plan::{FlowMode, FlowRequest, OperationPlan, Route};
use super::planner::OperationPlanner;
use crate::chain::ChainDirectory;
use crate::error::{OrchestratorError, OrchestratorResult, PlanningError};
use crate::events::{ProgressEvent, ProgressKind, ProgressSink, PROGRESS_CHANNEL_CAPACITY};
use crate::metrics;
use crate::operations::BalanceReader;
use crate::session::Session;

use chrono::Utc;
use ethers::types::{Address, U256};
use ethers::utils::format_units;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// A flow that passed every pre-flight check and holds its relay lease
#[derive(Debug)]
pub struct PreparedFlow {
    pub flow_id: Uuid,
    pub plan: Arc<OperationPlan>,
    lease: Option<RelayLease>,
}

/// Cross-chain vault operation orchestrator
pub struct Orchestrator {
    /// Signer handle and credential
    session: Session,
    /// Pure step planner
    planner: OperationPlanner,
    /// Relay wallet gas guard
    guard: FundingGuard,
    /// Step executor
    executor: StepExecutor,
    /// Balance reads for pre-flight checks
    balances: Arc<dyn BalanceReader>,
    /// Configured chains
    directory: Arc<ChainDirectory>,
    /// Relay wallets currently in use
    locks: RelayLocks,
    /// Progress stream shared by all flows
    events: broadcast::Sender<ProgressEvent>,
}

impl Orchestrator {
    pub fn new(
        session: Session,
        planner: OperationPlanner,
        guard: FundingGuard,
        executor: StepExecutor,
        balances: Arc<dyn BalanceReader>,
        directory: Arc<ChainDirectory>,
    ) -> Self {
        let (events, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);

        Self {
            session,
            planner,
            guard,
            executor,
            balances,
            directory,
            locks: RelayLocks::new(),
            events,
        }
    }

    /// Subscribe to progress events of every flow
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn relay_address(&self) -> Address {
        self.session.relay_address()
    }

    pub fn is_executing(&self) -> bool {
        self.locks.is_executing(self.relay_address())
    }

    /// Current relay wallet state on `chain_id`
    pub async fn relay_state(&self, chain_id: u64) -> OrchestratorResult<RelayWalletState> {
        self.known_chain(chain_id)?;
        let state = self
            .guard
            .relay_state(self.relay_address(), chain_id, self.is_executing())
            .await?;
        Ok(state)
    }

    /// Plan without authorizing or reserving anything
    pub async fn preview(&self, request: &FlowRequest) -> OrchestratorResult<OperationPlan> {
        self.validate(request)?;
        let draft = self
            .planner
            .plan(request, false)
            .ok_or(PlanningError::NothingSelected)?;

        if draft.route == Route::Direct {
            return Ok(draft);
        }

        let needs_funding = match self.relay_state(draft.funding_chain()).await {
            Ok(state) => state.needs_funding,
            Err(e) => {
                warn!("Relay balance unavailable for preview, assuming funding: {}", e);
                true
            }
        };

        self.planner
            .plan(request, needs_funding)
            .ok_or_else(|| PlanningError::NothingSelected.into())
    }

    /// Authorize, plan and reserve the relay wallet for a new flow
    #[instrument(skip(self, request), fields(mode = ?request.mode))]
    pub async fn prepare(
        &self,
        flow_id: Uuid,
        request: &FlowRequest,
    ) -> OrchestratorResult<PreparedFlow> {
        self.session.authorize(Utc::now())?;
        self.validate(request)?;

        let draft = self
            .planner
            .plan(request, false)
            .ok_or(PlanningError::NothingSelected)?;

        let (lease, needs_funding) = match draft.route {
            Route::Direct => (None, false),
            Route::Relay => {
                self.session.require_abilities(&draft.required_abilities())?;
                let lease = self.locks.try_acquire(self.relay_address(), flow_id)?;
                let state = self
                    .guard
                    .relay_state(self.relay_address(), draft.funding_chain(), true)
                    .await?;
                (Some(lease), state.needs_funding)
            }
        };

        let plan = self
            .planner
            .plan(request, needs_funding)
            .ok_or(PlanningError::NothingSelected)?;

        if plan.mode == FlowMode::Deposit {
            self.check_owner_balance(&plan).await?;
        }

        info!(
            "Flow {} planned: {:?} route, steps {:?}",
            flow_id,
            plan.route,
            plan.step_ids()
        );

        Ok(PreparedFlow {
            flow_id,
            plan: Arc::new(plan),
            lease,
        })
    }

    /// Fund the relay wallet if needed, then run every step.
    ///
    /// The relay lease is released when this returns.
    #[instrument(skip(self, flow), fields(flow_id = %flow.flow_id))]
    pub async fn execute(&self, flow: PreparedFlow) -> OrchestratorResult<Arc<TerminalResult>> {
        let PreparedFlow {
            flow_id,
            plan,
            lease,
        } = flow;
        let sink = ProgressSink::new(flow_id, self.events.clone());

        sink.emit(ProgressKind::FlowStarted { plan: plan.clone() });
        metrics::record_flow_started(plan.mode);

        let funding = match plan.route {
            Route::Direct => FundingReceipt::NotRequired,
            Route::Relay => {
                let funded = self
                    .guard
                    .ensure_funded(
                        self.relay_address(),
                        plan.funding_chain(),
                        plan.estimated_funding_amount,
                        plan.is_cross_chain(),
                        &sink,
                    )
                    .await;

                match funded {
                    Ok(receipt) => receipt,
                    Err(e) => {
                        error!("Flow {} aborted before any step: {}", flow_id, e);
                        sink.emit(ProgressKind::FlowFailed {
                            failed_step: None,
                            cause: e.to_string(),
                        });
                        metrics::record_flow_failed(None);
                        return Err(e.into());
                    }
                }
            }
        };

        let result = match self.executor.execute(&plan, &funding, &sink).await {
            Ok(result) => Arc::new(result),
            Err(e) => {
                error!("Flow {} stopped: {}", flow_id, e);
                sink.emit(ProgressKind::FlowFailed {
                    failed_step: None,
                    cause: e.to_string(),
                });
                metrics::record_flow_failed(None);
                return Err(e);
            }
        };

        drop(lease);

        if result.success {
            info!("Flow {} completed", flow_id);
            metrics::record_flow_completed(plan.mode);
            sink.emit(ProgressKind::FlowCompleted {
                result: result.clone(),
            });
        } else {
            metrics::record_flow_failed(result.failed_step_id);
            sink.emit(ProgressKind::FlowFailed {
                failed_step: result.failed_step_id,
                cause: result.cause.clone().unwrap_or_default(),
            });
        }

        Ok(result)
    }

    /// Prepare and execute in one call
    pub async fn run(&self, request: &FlowRequest) -> OrchestratorResult<Arc<TerminalResult>> {
        let flow = self.prepare(Uuid::new_v4(), request).await?;
        self.execute(flow).await
    }

    fn validate(&self, request: &FlowRequest) -> OrchestratorResult<()> {
        if request.amount.is_zero() {
            return Err(PlanningError::ZeroAmount.into());
        }

        self.known_chain(request.vault_chain)?;
        match request.mode {
            FlowMode::Deposit => self.known_chain(request.source_chain)?,
            FlowMode::Withdraw => {
                if let Some(target) = request.target_chain {
                    self.known_chain(target)?;
                }
            }
        }

        Ok(())
    }

    fn known_chain(&self, chain_id: u64) -> OrchestratorResult<()> {
        if self.directory.contains(chain_id) {
            Ok(())
        } else {
            Err(PlanningError::UnknownChain { chain_id }.into())
        }
    }

    async fn check_owner_balance(&self, plan: &OperationPlan) -> OrchestratorResult<()> {
        let asset = &plan.asset;
        let read = if asset.is_native {
            self.balances
                .native_balance(plan.owner, plan.source_chain)
                .await
        } else {
            self.balances
                .asset_balance(plan.owner, asset.address, plan.source_chain)
                .await
        };

        let balance = read.map_err(|e| OrchestratorError::ChainConnection {
            chain_id: plan.source_chain,
            message: e.to_string(),
        })?;

        if balance < plan.amount {
            return Err(PlanningError::InsufficientBalance {
                chain_id: plan.source_chain,
                symbol: asset.symbol.clone(),
                have: display(balance, asset.decimals),
                need: display(plan.amount, asset.decimals),
            }
            .into());
        }

        Ok(())
    }
}

fn display(amount: U256, decimals: u8) -> String {
    format_units(amount, decimals as u32).unwrap_or_else(|_| amount.to_string())
}
