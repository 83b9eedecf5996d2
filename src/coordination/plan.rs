//! Plan model: what a single user-initiated flow is going to do

use crate::session::Ability;

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ChainId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMode {
    Deposit,
    Withdraw,
}

/// Token being moved. Native currency uses the zero address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub is_native: bool,
}

impl Asset {
    pub fn native_eth() -> Self {
        Self {
            address: Address::zero(),
            symbol: "ETH".to_string(),
            decimals: 18,
            is_native: true,
        }
    }

    /// ETH and WETH are what the vault holds; everything else gets swapped
    /// before leaving its chain.
    pub fn is_target_asset(&self) -> bool {
        matches!(self.symbol.to_ascii_uppercase().as_str(), "ETH" | "WETH")
    }
}

/// Stable step identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepId {
    #[serde(rename = "fund-pkp")]
    FundRelay,
    #[serde(rename = "transfer-to-pkp")]
    TransferToRelay,
    #[serde(rename = "swap-token")]
    Swap,
    #[serde(rename = "bridge-token")]
    Bridge,
    #[serde(rename = "deposit-vault")]
    DepositVault,
    #[serde(rename = "withdraw-vault")]
    WithdrawVault,
    #[serde(rename = "transfer-eoa")]
    TransferToOwner,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::FundRelay => "fund-pkp",
            StepId::TransferToRelay => "transfer-to-pkp",
            StepId::Swap => "swap-token",
            StepId::Bridge => "bridge-token",
            StepId::DepositVault => "deposit-vault",
            StepId::WithdrawVault => "withdraw-vault",
            StepId::TransferToOwner => "transfer-eoa",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepSpec {
    pub id: StepId,
    pub title: String,
    pub description: String,
}

/// Who signs the flow's transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Single user-signed vault deposit, no relay wallet involved
    Direct,
    /// Intermediate steps signed by the delegated relay wallet
    Relay,
}

/// Gas budget tiers, ordered cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingTier {
    Minimum,
    Medium,
    Complex,
}

impl FundingTier {
    pub fn for_route(needs_swap: bool, needs_bridge: bool) -> Self {
        match (needs_swap, needs_bridge) {
            (true, true) => FundingTier::Complex,
            (true, false) | (false, true) => FundingTier::Medium,
            (false, false) => FundingTier::Minimum,
        }
    }

    pub fn duration_label(&self) -> &'static str {
        match self {
            FundingTier::Complex => "5-10 minutes",
            FundingTier::Medium => "2-5 minutes",
            FundingTier::Minimum => "under 1 minute",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingTiers {
    pub minimum: U256,
    pub medium: U256,
    pub complex: U256,
}

impl FundingTiers {
    pub fn amount(&self, tier: FundingTier) -> U256 {
        match tier {
            FundingTier::Minimum => self.minimum,
            FundingTier::Medium => self.medium,
            FundingTier::Complex => self.complex,
        }
    }
}

/// What the caller asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRequest {
    pub mode: FlowMode,
    /// Wallet that owns the funds and receives withdrawals
    pub owner: Address,
    /// Chain holding the user's funds (deposit only)
    pub source_chain: ChainId,
    pub vault_chain: ChainId,
    pub asset: Option<Asset>,
    /// Chain the proceeds should land on (withdraw only)
    #[serde(default)]
    pub target_chain: Option<ChainId>,
    /// Asset the proceeds should be converted to (withdraw only)
    #[serde(default)]
    pub receive_asset: Option<Asset>,
    pub amount: U256,
}

/// Immutable result of planning
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPlan {
    pub mode: FlowMode,
    pub route: Route,
    pub owner: Address,
    pub source_chain: ChainId,
    pub target_chain: ChainId,
    pub vault_chain: ChainId,
    pub asset: Asset,
    pub receive_asset: Option<Asset>,
    pub amount: U256,
    pub needs_swap: bool,
    pub needs_bridge: bool,
    pub steps: Vec<StepSpec>,
    pub funding_tier: FundingTier,
    pub estimated_funding_amount: U256,
    pub estimated_duration: String,
}

impl OperationPlan {
    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id).collect()
    }

    pub fn has_step(&self, id: StepId) -> bool {
        self.steps.iter().any(|s| s.id == id)
    }

    /// Chain where the relay wallet sends its first transaction
    pub fn funding_chain(&self) -> ChainId {
        match self.mode {
            FlowMode::Deposit => self.source_chain,
            FlowMode::Withdraw => self.vault_chain,
        }
    }

    pub fn is_cross_chain(&self) -> bool {
        self.needs_bridge
    }

    /// Abilities the delegated signer must hold to run this plan
    pub fn required_abilities(&self) -> Vec<Ability> {
        if self.route == Route::Direct {
            return Vec::new();
        }

        self.steps
            .iter()
            .filter_map(|s| match s.id {
                StepId::Swap => Some(Ability::Swap),
                StepId::Bridge => Some(Ability::Bridge),
                StepId::DepositVault => Some(Ability::VaultDeposit),
                StepId::WithdrawVault => Some(Ability::VaultWithdraw),
                StepId::TransferToOwner => Some(Ability::Transfer),
                StepId::FundRelay | StepId::TransferToRelay => None,
            })
            .collect()
    }
}
