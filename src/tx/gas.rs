//! Gas estimation with safety buffers for primary-wallet transactions

use crate::chain::{ChainProvider, GasPrice};
use crate::error::OrchestratorResult;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::debug;

/// Gas estimator for transactions
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    /// Create a new gas estimator
    pub fn new() -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
        }
    }

    /// Estimated gas limit for `tx` plus the limit buffer
    pub async fn estimate_gas_limit(
        &self,
        provider: &ChainProvider,
        tx: &TypedTransaction,
    ) -> OrchestratorResult<U256> {
        let estimate = provider.estimate_gas(tx).await?;
        Ok(self.buffer_limit(estimate))
    }

    pub fn buffer_limit(&self, estimate: U256) -> U256 {
        estimate + estimate * self.gas_limit_buffer_percent / 100
    }

    /// Get buffered gas price for a chain
    pub async fn get_gas_price(&self, provider: &ChainProvider) -> OrchestratorResult<GasPrice> {
        let gas_price = provider.get_gas_price().await?;
        let buffered = self.buffer_price(gas_price);

        debug!("Gas price for chain {}: {:?}", provider.chain_id(), buffered);
        Ok(buffered)
    }

    pub fn buffer_price(&self, gas_price: GasPrice) -> GasPrice {
        match gas_price {
            GasPrice::Legacy(price) => {
                let buffer = price * self.gas_price_buffer_percent / 100;
                GasPrice::Legacy(price + buffer)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let fee_buffer = max_fee_per_gas * self.gas_price_buffer_percent / 100;
                let priority_buffer =
                    max_priority_fee_per_gas * self.gas_price_buffer_percent / 100;
                GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee_per_gas + fee_buffer,
                    max_priority_fee_per_gas: max_priority_fee_per_gas + priority_buffer,
                }
            }
        }
    }

    /// Calculate total cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit * *price,
            GasPrice::Eip1559 { max_fee_per_gas, .. } => gas_limit * *max_fee_per_gas,
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}
