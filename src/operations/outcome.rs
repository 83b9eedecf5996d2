use ethers::types::{Address, TxHash, U256};
use serde::Serialize;

/// What a completed step produced. Each variant carries exactly the fields
/// its operation guarantees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StepOutcome {
    Funded {
        tx_hash: Option<TxHash>,
        verified: bool,
    },
    Transferred {
        tx_hash: TxHash,
        token: Option<Address>,
        amount: U256,
    },
    Swapped {
        tx_hash: TxHash,
        token_out: Address,
        amount_out: U256,
    },
    Bridged {
        tx_hash: TxHash,
        order_id: String,
        destination_chain: u64,
        destination_token: Address,
        amount_out: U256,
        estimated_arrival_secs: u64,
    },
    Deposited {
        tx_hash: TxHash,
        token: Address,
        amount: U256,
    },
    Withdrawn {
        tx_hash: TxHash,
        token: Address,
        amount: U256,
    },
}

impl StepOutcome {
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            StepOutcome::Funded { tx_hash, .. } => *tx_hash,
            StepOutcome::Transferred { tx_hash, .. }
            | StepOutcome::Swapped { tx_hash, .. }
            | StepOutcome::Bridged { tx_hash, .. }
            | StepOutcome::Deposited { tx_hash, .. }
            | StepOutcome::Withdrawn { tx_hash, .. } => Some(*tx_hash),
        }
    }
}
