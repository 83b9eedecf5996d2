//! Configuration management for the vault orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::coordination::{FundingTiers, RetryPolicy};
use crate::session::Ability;

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use ethers::utils::parse_ether;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_SAME_CHAIN_ATTEMPTS: u32 = 10;
const MAX_CROSS_CHAIN_ATTEMPTS: u32 = 5;
/// Failed cross-chain attempts before a pending funding tx is accepted
const MIN_LENIENT_ATTEMPTS: u32 = 3;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    pub wallet: WalletConfig,
    pub abilities: AbilitiesConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Relay wallet balance below which funding is required (ETH)
    #[serde(default = "default_minimum_relay_balance")]
    pub minimum_relay_balance: String,
    pub funding_tiers: FundingTiersConfig,
    #[serde(default = "default_bridge_settle_delay_secs")]
    pub bridge_settle_delay_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_funding_confirmation_timeout_secs")]
    pub funding_confirmation_timeout_secs: u64,
    #[serde(default = "default_swap_slippage_bps")]
    pub swap_slippage_bps: u32,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundingTiersConfig {
    pub minimum: String,
    pub medium: String,
    pub complex: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub same_chain: RetryPolicyConfig,
    pub cross_chain: RetryPolicyConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            same_chain: RetryPolicyConfig {
                max_attempts: 10,
                interval_ms: 2_000,
                lenient_after: None,
            },
            cross_chain: RetryPolicyConfig {
                max_attempts: 5,
                interval_ms: 3_000,
                lenient_after: Some(3),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicyConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub lenient_after: Option<u32>,
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(config: &RetryPolicyConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            interval: Duration::from_millis(config.interval_ms),
            lenient_after: config.lenient_after,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub vault_address: Address,
    pub weth_address: Address,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
    Arbitrum,
    Optimism,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbilitiesConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub relay_address: Address,
    pub credential_env: String,
    pub permitted_abilities: Vec<Ability>,
}

fn default_minimum_relay_balance() -> String {
    "0.001".to_string()
}

fn default_bridge_settle_delay_secs() -> u64 {
    5
}

fn default_call_timeout_secs() -> u64 {
    300
}

fn default_funding_confirmation_timeout_secs() -> u64 {
    120
}

fn default_swap_slippage_bps() -> u32 {
    50
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Settings {
    /// Load settings from the file named by `VAULT_ORCHESTRATOR_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("VAULT_ORCHESTRATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in &self.chains {
            if !chain.enabled {
                continue;
            }
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.vault_address.is_zero() {
                anyhow::bail!("Chain {} has no vault address configured", name);
            }
            if chain.weth_address.is_zero() {
                anyhow::bail!("Chain {} has no WETH address configured", name);
            }
        }

        self.minimum_relay_balance()?;
        self.funding_tiers()?;

        let retry = &self.orchestrator.retry;
        if retry.same_chain.max_attempts == 0 || retry.cross_chain.max_attempts == 0 {
            anyhow::bail!("Funding verification needs at least one attempt");
        }
        if retry.same_chain.max_attempts > MAX_SAME_CHAIN_ATTEMPTS {
            anyhow::bail!(
                "Same-chain funding verification allows at most {} attempts",
                MAX_SAME_CHAIN_ATTEMPTS
            );
        }
        if retry.cross_chain.max_attempts > MAX_CROSS_CHAIN_ATTEMPTS {
            anyhow::bail!(
                "Cross-chain funding verification allows at most {} attempts",
                MAX_CROSS_CHAIN_ATTEMPTS
            );
        }
        if retry.same_chain.lenient_after.is_some() {
            anyhow::bail!("Same-chain funding verification cannot be lenient");
        }
        if let Some(after) = retry.cross_chain.lenient_after {
            if after < MIN_LENIENT_ATTEMPTS {
                anyhow::bail!(
                    "Cross-chain leniency needs at least {} failed attempts",
                    MIN_LENIENT_ATTEMPTS
                );
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }

    pub fn minimum_relay_balance(&self) -> Result<U256> {
        parse_eth(&self.orchestrator.minimum_relay_balance, "minimum_relay_balance")
    }

    /// Funding tier amounts, which must be strictly increasing
    pub fn funding_tiers(&self) -> Result<FundingTiers> {
        let tiers = &self.orchestrator.funding_tiers;
        let minimum = parse_eth(&tiers.minimum, "funding_tiers.minimum")?;
        let medium = parse_eth(&tiers.medium, "funding_tiers.medium")?;
        let complex = parse_eth(&tiers.complex, "funding_tiers.complex")?;

        if !(minimum < medium && medium < complex) {
            anyhow::bail!("Funding tiers must satisfy minimum < medium < complex");
        }

        Ok(FundingTiers {
            minimum,
            medium,
            complex,
        })
    }

    pub fn same_chain_retry(&self) -> RetryPolicy {
        (&self.orchestrator.retry.same_chain).into()
    }

    pub fn cross_chain_retry(&self) -> RetryPolicy {
        (&self.orchestrator.retry.cross_chain).into()
    }
}

fn parse_eth(value: &str, field: &str) -> Result<U256> {
    parse_ether(value).with_context(|| format!("Invalid ETH amount for {}: {}", field, value))
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex is valid");

    re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
