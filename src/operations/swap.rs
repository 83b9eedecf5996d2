use super::{two_phase, DexService, StepOutcome, SwapParams};
use crate::coordination::StepId;
use crate::error::{OperationError, ServiceError};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct SwapOperation {
    dex: Arc<dyn DexService>,
    deadline: Duration,
}

impl SwapOperation {
    pub fn new(dex: Arc<dyn DexService>, deadline: Duration) -> Self {
        Self { dex, deadline }
    }

    /// Quote, then swap. A receipt below the quoted minimum is a failure.
    pub async fn run(&self, params: SwapParams) -> Result<StepOutcome, OperationError> {
        let dex = &self.dex;
        let (quote, receipt) = two_phase(
            StepId::Swap,
            self.deadline,
            dex.precheck(&params),
            || dex.execute(&params),
        )
        .await?;

        debug!(
            "Swap quote {} (min {}), received {}",
            quote.amount_out, quote.min_amount_out, receipt.amount_out
        );

        if receipt.amount_out < quote.min_amount_out {
            return Err(OperationError::Execution {
                step: StepId::Swap,
                source: ServiceError::Rejected(format!(
                    "received {} below minimum {}",
                    receipt.amount_out, quote.min_amount_out
                )),
            });
        }

        info!(
            "Swapped {} {:?} -> {} {:?} on chain {}",
            params.amount_in, params.token_in, receipt.amount_out, params.token_out, params.chain_id
        );

        Ok(StepOutcome::Swapped {
            tx_hash: receipt.tx_hash,
            token_out: params.token_out,
            amount_out: receipt.amount_out,
        })
    }
}
