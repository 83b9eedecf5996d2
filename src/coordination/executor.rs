//! Step Executor
//!
//! Walks a plan in order, binding each step id to its Asset Movement
//! Operation. Outputs flow forward through a holding cursor: a swap's output
//! token is what the bridge moves, the bridge's destination token is what
//! gets deposited. The first failure freezes the rest of the plan.

use super::funding::FundingReceipt;
use super::plan::{FlowMode, OperationPlan, Route, StepId};
use super::progress::{ProgressTracker, StepState};
use crate::chain::ChainDirectory;
use crate::error::{OperationError, OrchestratorResult};
use crate::events::ProgressSink;
use crate::metrics;
use crate::operations::{
    BridgeOperation, BridgeParams, BridgeService, DexService, StepOutcome, SwapOperation,
    SwapParams, TransferOperation, TransferParams, TransferService, VaultAction, VaultCall,
    VaultOperation, VaultService,
};
use crate::session::Session;

use ethers::types::{Address, U256};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// External services the executor dispatches to
#[derive(Clone)]
pub struct ExecutionServices {
    /// Transfers signed by the user's primary wallet (`transfer-to-pkp`)
    pub owner_transfer: Arc<dyn TransferService>,
    /// Vault calls signed by the user's primary wallet (direct path)
    pub owner_vault: Arc<dyn VaultService>,
    /// Transfers signed by the relay wallet (`transfer-eoa`)
    pub relay_transfer: Arc<dyn TransferService>,
    pub relay_vault: Arc<dyn VaultService>,
    pub dex: Arc<dyn DexService>,
    pub bridge: Arc<dyn BridgeService>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Deadline for each precheck and each execute call
    pub call_timeout: Duration,
    /// Fixed wait after a bridge step before the next step starts
    pub bridge_settle_delay: Duration,
    pub swap_slippage_bps: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(300),
            bridge_settle_delay: Duration::from_secs(5),
            swap_slippage_bps: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedStep {
    pub step: StepId,
    pub outcome: StepOutcome,
}

/// Terminal outcome of one flow
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResult {
    pub flow_id: Uuid,
    pub success: bool,
    pub failed_step_id: Option<StepId>,
    pub cause: Option<String>,
    pub steps: Arc<[StepState]>,
    pub outcomes: Vec<CompletedStep>,
}

/// Where the funds currently sit while a flow is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Holding {
    chain_id: u64,
    token: Address,
    native: bool,
    amount: U256,
}

impl Holding {
    fn initial(plan: &OperationPlan) -> Self {
        let chain_id = match plan.mode {
            FlowMode::Deposit => plan.source_chain,
            FlowMode::Withdraw => plan.vault_chain,
        };

        Self {
            chain_id,
            token: plan.asset.address,
            native: plan.asset.is_native,
            amount: plan.amount,
        }
    }

    fn token_param(&self) -> Option<Address> {
        (!self.native).then_some(self.token)
    }

    fn apply(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Swapped {
                token_out,
                amount_out,
                ..
            } => {
                self.token = *token_out;
                self.native = false;
                self.amount = *amount_out;
            }
            StepOutcome::Bridged {
                destination_chain,
                destination_token,
                amount_out,
                ..
            } => {
                self.chain_id = *destination_chain;
                self.token = *destination_token;
                self.native = destination_token.is_zero();
                self.amount = *amount_out;
            }
            _ => {}
        }
    }
}

pub struct StepExecutor {
    relay: Address,
    owner_transfer: TransferOperation,
    relay_transfer: TransferOperation,
    owner_vault: VaultOperation,
    relay_vault: VaultOperation,
    swap: SwapOperation,
    bridge: BridgeOperation,
    directory: Arc<ChainDirectory>,
    config: ExecutorConfig,
}

impl StepExecutor {
    pub fn new(
        session: &Session,
        services: ExecutionServices,
        directory: Arc<ChainDirectory>,
        config: ExecutorConfig,
    ) -> Self {
        let deadline = config.call_timeout;

        Self {
            relay: session.relay_address(),
            owner_transfer: TransferOperation::new(services.owner_transfer, deadline),
            relay_transfer: TransferOperation::new(services.relay_transfer, deadline),
            owner_vault: VaultOperation::new(services.owner_vault, deadline),
            relay_vault: VaultOperation::new(services.relay_vault, deadline),
            swap: SwapOperation::new(services.dex, deadline),
            bridge: BridgeOperation::new(services.bridge, deadline),
            directory,
            config,
        }
    }

    /// Run every step of `plan` in order.
    ///
    /// Step failures end in a `TerminalResult` with `success: false`; an `Err`
    /// means the tracker refused a transition, which is a bug.
    #[instrument(skip_all, fields(flow_id = %sink.flow_id(), route = ?plan.route))]
    pub async fn execute(
        &self,
        plan: &OperationPlan,
        funding: &FundingReceipt,
        sink: &ProgressSink,
    ) -> OrchestratorResult<TerminalResult> {
        let mut tracker = ProgressTracker::new(plan, sink.clone());
        let mut holding = Holding::initial(plan);
        let mut outcomes = Vec::with_capacity(plan.steps.len());

        for spec in &plan.steps {
            tracker.start(spec.id)?;
            info!("Step {} started: {}", spec.id, spec.description);

            let started = Instant::now();
            let result = self.run_step(spec.id, plan, funding, &holding).await;
            metrics::observe_step(spec.id, started.elapsed().as_secs_f64(), result.is_ok());

            match result {
                Ok(outcome) => {
                    holding.apply(&outcome);
                    tracker.complete(spec.id, outcome.tx_hash().map(|h| format!("{:?}", h)))?;
                    info!("Step {} completed", spec.id);

                    if spec.id == StepId::Bridge && !self.config.bridge_settle_delay.is_zero() {
                        // Source-chain confirmation does not prove arrival on the destination
                        info!(
                            "Waiting {:?} for bridged funds to settle",
                            self.config.bridge_settle_delay
                        );
                        tokio::time::sleep(self.config.bridge_settle_delay).await;
                    }

                    outcomes.push(CompletedStep {
                        step: spec.id,
                        outcome,
                    });
                }
                Err(e) => {
                    error!("Step {} failed: {}", spec.id, e);
                    tracker.fail(spec.id)?;

                    return Ok(TerminalResult {
                        flow_id: sink.flow_id(),
                        success: false,
                        failed_step_id: Some(e.step()),
                        cause: Some(e.to_string()),
                        steps: tracker.snapshot(),
                        outcomes,
                    });
                }
            }
        }

        Ok(TerminalResult {
            flow_id: sink.flow_id(),
            success: true,
            failed_step_id: None,
            cause: None,
            steps: tracker.snapshot(),
            outcomes,
        })
    }

    async fn run_step(
        &self,
        step: StepId,
        plan: &OperationPlan,
        funding: &FundingReceipt,
        holding: &Holding,
    ) -> Result<StepOutcome, OperationError> {
        match step {
            StepId::FundRelay => {
                if !funding.is_verified() {
                    warn!("Relay funding was not observed on chain, continuing");
                }
                Ok(StepOutcome::Funded {
                    tx_hash: funding.tx_hash(),
                    verified: funding.is_verified(),
                })
            }

            StepId::TransferToRelay => {
                let params = TransferParams {
                    chain_id: holding.chain_id,
                    from: plan.owner,
                    to: self.relay,
                    token: holding.token_param(),
                    amount: holding.amount,
                };
                self.owner_transfer.run(step, params).await
            }

            StepId::Swap => {
                let token_out = match (plan.mode, &plan.receive_asset) {
                    (FlowMode::Withdraw, Some(wanted)) => wanted.address,
                    _ => self.weth(step, holding.chain_id)?,
                };
                let params = SwapParams {
                    chain_id: holding.chain_id,
                    token_in: holding.token,
                    token_out,
                    amount_in: holding.amount,
                    slippage_bps: self.config.swap_slippage_bps,
                    recipient: self.relay,
                };
                self.swap.run(params).await
            }

            StepId::Bridge => {
                let destination_chain = match plan.mode {
                    FlowMode::Deposit => plan.vault_chain,
                    FlowMode::Withdraw => plan.target_chain,
                };
                let params = BridgeParams {
                    source_chain: holding.chain_id,
                    destination_chain,
                    token: holding.token,
                    amount: holding.amount,
                    recipient: self.relay,
                };
                self.bridge.run(params).await
            }

            StepId::DepositVault => {
                let call = VaultCall {
                    chain_id: plan.vault_chain,
                    vault: self.vault(step, plan.vault_chain)?,
                    action: VaultAction::Deposit,
                    token: holding.token,
                    amount: holding.amount,
                    native: holding.native,
                };
                match plan.route {
                    Route::Direct => self.owner_vault.run(call).await,
                    Route::Relay => self.relay_vault.run(call).await,
                }
            }

            StepId::WithdrawVault => {
                let call = VaultCall {
                    chain_id: plan.vault_chain,
                    vault: self.vault(step, plan.vault_chain)?,
                    action: VaultAction::Withdraw,
                    token: plan.asset.address,
                    amount: plan.amount,
                    native: plan.asset.is_native,
                };
                self.relay_vault.run(call).await
            }

            StepId::TransferToOwner => {
                let params = TransferParams {
                    chain_id: holding.chain_id,
                    from: self.relay,
                    to: plan.owner,
                    token: holding.token_param(),
                    amount: holding.amount,
                };
                self.relay_transfer.run(step, params).await
            }
        }
    }

    fn weth(&self, step: StepId, chain_id: u64) -> Result<Address, OperationError> {
        self.directory
            .weth(chain_id)
            .ok_or_else(|| OperationError::MissingInput {
                step,
                what: format!("WETH address for chain {}", chain_id),
            })
    }

    fn vault(&self, step: StepId, chain_id: u64) -> Result<Address, OperationError> {
        self.directory
            .vault(chain_id)
            .ok_or_else(|| OperationError::MissingInput {
                step,
                what: format!("vault address for chain {}", chain_id),
            })
    }
}
