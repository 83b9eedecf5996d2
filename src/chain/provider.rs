//! Chain provider with multi-RPC support and automatic failover

use crate::config::{ChainConfig, GasPriceStrategy};
use crate::contracts::{BalanceOfCall, BalanceOfReturn};
use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::abi::{AbiDecode, AbiEncode};
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Last known block number
    last_block: RwLock<u64>,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig) -> OrchestratorResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(500));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(OrchestratorError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            last_block: RwLock::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    fn connection_error(&self, message: impl Into<String>) -> OrchestratorError {
        OrchestratorError::ChainConnection {
            chain_id: self.config.chain_id,
            message: message.into(),
        }
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> OrchestratorResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => {
                    let block_num = block.as_u64();
                    *self.last_block.write().await = block_num;
                    return Ok(block_num);
                }
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    pub async fn last_block(&self) -> u64 {
        *self.last_block.read().await
    }

    /// Native balance with failover
    pub async fn native_balance(&self, address: Address) -> OrchestratorResult<U256> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_balance(address, None).await {
                Ok(balance) => return Ok(balance),
                Err(e) => {
                    warn!(
                        "Failed to get balance of {:?} on chain {}: {}",
                        address, self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get balance"))
    }

    /// ERC-20 `balanceOf` through a read-only call
    pub async fn token_balance(&self, token: Address, holder: Address) -> OrchestratorResult<U256> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(token)
            .data(BalanceOfCall { owner: holder }.encode())
            .into();

        let raw = self.call(&tx).await?;
        let decoded = BalanceOfReturn::decode(raw.as_ref())
            .map_err(|e| self.connection_error(format!("balanceOf decode: {}", e)))?;

        Ok(decoded.0)
    }

    /// Simulate a transaction against the latest state
    pub async fn call(&self, tx: &TypedTransaction) -> OrchestratorResult<Bytes> {
        self.http()
            .call(tx, None)
            .await
            .map_err(|e| self.connection_error(e.to_string()))
    }

    /// Get transaction receipt
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> OrchestratorResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.connection_error(e.to_string()))
    }

    /// Pending nonce for `address`
    pub async fn transaction_count(&self, address: Address) -> OrchestratorResult<U256> {
        self.http()
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.connection_error(e.to_string()))
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> OrchestratorResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| self.connection_error(format!("gas estimation: {}", e)))
    }

    /// Get current gas price based on chain strategy
    pub async fn get_gas_price(&self) -> OrchestratorResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy | GasPriceStrategy::Arbitrum => {
                // Arbitrum quotes a single L2 price that already covers L1 data
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| self.connection_error(format!("gas price: {}", e)))?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 | GasPriceStrategy::Optimism => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> OrchestratorResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| self.connection_error(e.to_string()))?
            .ok_or_else(|| self.connection_error("No latest block"))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| self.connection_error("No base fee in block"))?;

        // 2 gwei tip
        let priority_fee = U256::from(2_000_000_000u64);

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = base_fee * 2 + priority_fee;

        let max_gwei = U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        let max_fee = std::cmp::min(max_fee, max_gwei);

        Ok((max_fee, priority_fee))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Gas price types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}
