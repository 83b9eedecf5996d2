//! Capability contracts for the external collaborators
//!
//! Everything the orchestrator does on-chain goes through one of these
//! traits. Production implementations live in `chain`, `tx` and `services`;
//! tests substitute recording mocks.

use crate::error::ServiceError;

use async_trait::async_trait;
use ethers::types::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};

/// Reads balances on any configured chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceReader: Send + Sync {
    async fn native_balance(&self, address: Address, chain_id: u64) -> Result<U256, ServiceError>;

    async fn asset_balance(
        &self,
        address: Address,
        token: Address,
        chain_id: u64,
    ) -> Result<U256, ServiceError>;
}

/// Sends native currency from the user's primary wallet to the relay wallet
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FundingSource: Send + Sync {
    /// Send `amount` to `to` and wait for a successful receipt
    async fn fund(&self, to: Address, amount: U256, chain_id: u64) -> Result<TxHash, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferParams {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    /// `None` moves native currency
    pub token: Option<Address>,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub tx_hash: TxHash,
}

#[async_trait]
pub trait TransferService: Send + Sync {
    async fn precheck(&self, params: &TransferParams) -> Result<(), ServiceError>;

    async fn execute(&self, params: &TransferParams) -> Result<TransferReceipt, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapParams {
    pub chain_id: u64,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub slippage_bps: u32,
    pub recipient: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub amount_out: U256,
    pub min_amount_out: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapReceipt {
    pub tx_hash: TxHash,
    pub amount_out: U256,
}

/// DEX execution service
#[async_trait]
pub trait DexService: Send + Sync {
    async fn precheck(&self, params: &SwapParams) -> Result<SwapQuote, ServiceError>;

    async fn execute(&self, params: &SwapParams) -> Result<SwapReceipt, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeParams {
    pub source_chain: u64,
    pub destination_chain: u64,
    pub token: Address,
    pub amount: U256,
    pub recipient: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeQuote {
    /// Token the recipient receives on the destination chain
    pub destination_token: Address,
    pub amount_out: U256,
    pub fee: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeReceipt {
    pub tx_hash: TxHash,
    pub order_id: String,
    pub estimated_arrival_secs: u64,
}

/// Bridge execution service
#[async_trait]
pub trait BridgeService: Send + Sync {
    async fn precheck(&self, params: &BridgeParams) -> Result<BridgeQuote, ServiceError>;

    async fn execute(&self, params: &BridgeParams) -> Result<BridgeReceipt, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultAction {
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultCall {
    pub chain_id: u64,
    pub vault: Address,
    pub action: VaultAction,
    /// Zero address for the native asset
    pub token: Address,
    pub amount: U256,
    pub native: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultReceipt {
    pub tx_hash: TxHash,
}

/// Vault read/write interface (`depositAsset` / `withdrawAsset`)
#[async_trait]
pub trait VaultService: Send + Sync {
    async fn precheck(&self, call: &VaultCall) -> Result<(), ServiceError>;

    async fn execute(&self, call: &VaultCall) -> Result<VaultReceipt, ServiceError>;
}
