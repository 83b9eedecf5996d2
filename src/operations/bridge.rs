use super::{two_phase, BridgeParams, BridgeService, StepOutcome};
use crate::coordination::StepId;
use crate::error::OperationError;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct BridgeOperation {
    bridge: Arc<dyn BridgeService>,
    deadline: Duration,
}

impl BridgeOperation {
    pub fn new(bridge: Arc<dyn BridgeService>, deadline: Duration) -> Self {
        Self { bridge, deadline }
    }

    /// Submit the bridge order. Returns once the source-chain transaction is
    /// confirmed; arrival on the destination chain is not observed.
    pub async fn run(&self, params: BridgeParams) -> Result<StepOutcome, OperationError> {
        let bridge = &self.bridge;
        let (quote, receipt) = two_phase(
            StepId::Bridge,
            self.deadline,
            bridge.precheck(&params),
            || bridge.execute(&params),
        )
        .await?;

        info!(
            "Bridge order {} from chain {} to {} submitted: {:?}, eta {}s",
            receipt.order_id,
            params.source_chain,
            params.destination_chain,
            receipt.tx_hash,
            receipt.estimated_arrival_secs
        );

        Ok(StepOutcome::Bridged {
            tx_hash: receipt.tx_hash,
            order_id: receipt.order_id,
            destination_chain: params.destination_chain,
            destination_token: quote.destination_token,
            amount_out: quote.amount_out,
            estimated_arrival_secs: receipt.estimated_arrival_secs,
        })
    }
}
