use super::{two_phase, StepOutcome, TransferParams, TransferService};
use crate::coordination::StepId;
use crate::error::OperationError;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Native or ERC-20 transfer. Used for `transfer-to-pkp` (owner signs) and
/// `transfer-eoa` (relay signs).
pub struct TransferOperation {
    service: Arc<dyn TransferService>,
    deadline: Duration,
}

impl TransferOperation {
    pub fn new(service: Arc<dyn TransferService>, deadline: Duration) -> Self {
        Self { service, deadline }
    }

    pub async fn run(
        &self,
        step: StepId,
        params: TransferParams,
    ) -> Result<StepOutcome, OperationError> {
        let service = &self.service;
        let (_, receipt) = two_phase(
            step,
            self.deadline,
            service.precheck(&params),
            || service.execute(&params),
        )
        .await?;

        info!(
            "Transferred {} from {:?} to {:?} on chain {}: {:?}",
            params.amount, params.from, params.to, params.chain_id, receipt.tx_hash
        );

        Ok(StepOutcome::Transferred {
            tx_hash: receipt.tx_hash,
            token: params.token,
            amount: params.amount,
        })
    }
}
