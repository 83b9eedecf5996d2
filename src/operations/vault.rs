use super::{two_phase, StepOutcome, VaultAction, VaultCall, VaultService};
use crate::coordination::StepId;
use crate::error::OperationError;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// `depositAsset` / `withdrawAsset` against the vault contract
pub struct VaultOperation {
    vault: Arc<dyn VaultService>,
    deadline: Duration,
}

impl VaultOperation {
    pub fn new(vault: Arc<dyn VaultService>, deadline: Duration) -> Self {
        Self { vault, deadline }
    }

    pub async fn run(&self, call: VaultCall) -> Result<StepOutcome, OperationError> {
        let step = match call.action {
            VaultAction::Deposit => StepId::DepositVault,
            VaultAction::Withdraw => StepId::WithdrawVault,
        };

        let vault = &self.vault;
        let (_, receipt) = two_phase(step, self.deadline, vault.precheck(&call), || {
            vault.execute(&call)
        })
        .await?;

        info!(
            "Vault {:?} of {} {:?} on chain {}: {:?}",
            call.action, call.amount, call.token, call.chain_id, receipt.tx_hash
        );

        Ok(match call.action {
            VaultAction::Deposit => StepOutcome::Deposited {
                tx_hash: receipt.tx_hash,
                token: call.token,
                amount: call.amount,
            },
            VaultAction::Withdraw => StepOutcome::Withdrawn {
                tx_hash: receipt.tx_hash,
                token: call.token,
                amount: call.amount,
            },
        })
    }
}
