//! Chain module - handles multi-chain RPC access
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - Native and ERC-20 balance reads for the orchestrator
//! - The static chain directory (vault and WETH per chain)
//! - Health monitoring

pub mod directory;
pub mod provider;

pub use directory::{ChainDirectory, ChainRoute};
pub use provider::{ChainProvider, GasPrice};

use crate::config::Settings;
use crate::error::{OrchestratorError, OrchestratorResult, ServiceError};
use crate::operations::BalanceReader;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::info;

/// Reports whether every configured chain answers
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn health_check(&self) -> Vec<(u64, bool)>;
}

/// Providers for all configured chains
#[derive(Default)]
pub struct ChainRegistry {
    /// Chain providers indexed by chain ID
    providers: DashMap<u64, Arc<ChainProvider>>,
}

impl ChainRegistry {
    /// Create providers for all enabled chains
    pub fn new(settings: &Settings) -> OrchestratorResult<Self> {
        let providers = DashMap::new();

        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} ({}, ID: {})",
                name, chain_config.name, chain_config.chain_id
            );

            let provider = ChainProvider::new(chain_config.clone())?;
            providers.insert(chain_config.chain_id, Arc::new(provider));
        }

        Ok(Self { providers })
    }

    /// Get provider for a specific chain
    pub fn get_provider(&self, chain_id: u64) -> OrchestratorResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(OrchestratorError::ChainNotFound { chain_id })
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.providers.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl HealthProbe for ChainRegistry {
    async fn health_check(&self) -> Vec<(u64, bool)> {
        let providers: Vec<Arc<ChainProvider>> =
            self.providers.iter().map(|e| e.value().clone()).collect();

        let checks = providers.iter().map(|provider| async move {
            let healthy = provider.health_check().await;
            crate::metrics::record_chain_health(provider.chain_id(), healthy);
            (provider.chain_id(), healthy)
        });

        let mut results = futures::future::join_all(checks).await;
        results.sort_unstable_by_key(|(chain_id, _)| *chain_id);
        results
    }
}

fn transport(e: OrchestratorError) -> ServiceError {
    ServiceError::Transport(e.to_string())
}

#[async_trait]
impl BalanceReader for ChainRegistry {
    async fn native_balance(&self, address: Address, chain_id: u64) -> Result<U256, ServiceError> {
        let provider = self.get_provider(chain_id).map_err(transport)?;
        provider.native_balance(address).await.map_err(transport)
    }

    async fn asset_balance(
        &self,
        address: Address,
        token: Address,
        chain_id: u64,
    ) -> Result<U256, ServiceError> {
        let provider = self.get_provider(chain_id).map_err(transport)?;
        provider.token_balance(token, address).await.map_err(transport)
    }
}
