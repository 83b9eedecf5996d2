//! User's primary wallet: funds the relay wallet and signs the direct path
//!
//! Sends are never retried. A transaction either confirms with a success
//! receipt within the confirmation timeout or the call fails.

use super::gas::GasEstimator;
use crate::chain::{ChainRegistry, GasPrice};
use crate::contracts::{
    AllowanceCall, AllowanceReturn, ApproveCall, DepositAssetCall, TransferCall,
};
use crate::error::{OrchestratorError, OrchestratorResult, ServiceError};
use crate::operations::{
    FundingSource, TransferParams, TransferReceipt, TransferService, VaultAction, VaultCall,
    VaultReceipt, VaultService,
};

use async_trait::async_trait;
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub struct PrimaryWallet {
    /// Providers for every configured chain
    chains: Arc<ChainRegistry>,
    /// Gas estimator
    gas: GasEstimator,
    /// Wallet for signing
    wallet: LocalWallet,
    /// How long to wait for a receipt
    confirmation_timeout: Duration,
}

impl PrimaryWallet {
    pub fn new(chains: Arc<ChainRegistry>, wallet: LocalWallet, confirmation_timeout: Duration) -> Self {
        info!("Primary wallet initialized: {:?}", wallet.address());

        Self {
            chains,
            gas: GasEstimator::new(),
            wallet,
            confirmation_timeout,
        }
    }

    /// Load the signing key from the environment variable `key_env`
    pub fn load(
        chains: Arc<ChainRegistry>,
        key_env: &str,
        confirmation_timeout: Duration,
    ) -> OrchestratorResult<Self> {
        let wallet = load_wallet(key_env)?;
        Ok(Self::new(chains, wallet, confirmation_timeout))
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Sign, send and wait for a successful receipt
    async fn send(
        &self,
        chain_id: u64,
        to: Address,
        data: Option<Bytes>,
        value: U256,
    ) -> Result<TxHash, ServiceError> {
        let provider = self.chains.get_provider(chain_id).map_err(transport)?;
        let from = self.address();

        let nonce = provider.transaction_count(from).await.map_err(transport)?;
        let gas_price = self.gas.get_gas_price(&provider).await.map_err(transport)?;

        let mut probe = TransactionRequest::new().from(from).to(to).value(value);
        if let Some(ref data) = data {
            probe = probe.data(data.clone());
        }
        let gas_limit = self
            .gas
            .estimate_gas_limit(&provider, &probe.into())
            .await
            .map_err(|e| ServiceError::Rejected(e.to_string()))?;

        let tx = build_tx(from, to, data, value, nonce, gas_limit, &gas_price);
        let wallet = self.wallet.clone().with_chain_id(chain_id);
        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| ServiceError::Transport(format!("signing failed: {}", e)))?;

        let pending = provider
            .http()
            .send_raw_transaction(tx.rlp_signed(&signature))
            .await
            .map_err(|e| classify_send_error(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        info!("Transaction sent on chain {}: {:?}", chain_id, tx_hash);

        match timeout(self.confirmation_timeout, pending).await {
            Ok(Ok(Some(receipt))) if receipt.status == Some(1u64.into()) => {
                debug!("Transaction {:?} confirmed in block {:?}", tx_hash, receipt.block_number);
                Ok(tx_hash)
            }
            Ok(Ok(Some(_))) => Err(ServiceError::Reverted(format!("{:?} reverted", tx_hash))),
            Ok(Ok(None)) => Err(ServiceError::Transport(format!(
                "{:?} dropped from mempool",
                tx_hash
            ))),
            Ok(Err(e)) => Err(ServiceError::Transport(e.to_string())),
            Err(_) => {
                warn!(
                    "Transaction {:?} not confirmed within {:?}",
                    tx_hash, self.confirmation_timeout
                );
                Err(ServiceError::Transport(format!(
                    "{:?} not confirmed within {}s",
                    tx_hash,
                    self.confirmation_timeout.as_secs()
                )))
            }
        }
    }

    /// `eth_call` from the primary wallet; a revert means the call would fail
    async fn simulate(
        &self,
        chain_id: u64,
        to: Address,
        data: Vec<u8>,
        value: U256,
    ) -> Result<Bytes, ServiceError> {
        let provider = self.chains.get_provider(chain_id).map_err(transport)?;
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.address())
            .to(to)
            .data(data)
            .value(value)
            .into();

        provider
            .call(&tx)
            .await
            .map_err(|e| ServiceError::Rejected(format!("simulation failed: {}", e)))
    }

    async fn require_balance(
        &self,
        chain_id: u64,
        token: Option<Address>,
        amount: U256,
    ) -> Result<(), ServiceError> {
        let provider = self.chains.get_provider(chain_id).map_err(transport)?;
        let balance = match token {
            None => provider.native_balance(self.address()).await,
            Some(token) => provider.token_balance(token, self.address()).await,
        }
        .map_err(transport)?;

        if balance < amount {
            return Err(ServiceError::Rejected(format!(
                "balance {} below required {}",
                balance, amount
            )));
        }

        Ok(())
    }

    async fn allowance(&self, chain_id: u64, token: Address, spender: Address) -> Result<U256, ServiceError> {
        let raw = self
            .simulate(
                chain_id,
                token,
                AllowanceCall {
                    owner: self.address(),
                    spender,
                }
                .encode(),
                U256::zero(),
            )
            .await?;

        AllowanceReturn::decode(raw.as_ref())
            .map(|r| r.0)
            .map_err(|e| ServiceError::Transport(format!("allowance decode: {}", e)))
    }
}

/// Load wallet from the named environment variable
fn load_wallet(key_env: &str) -> OrchestratorResult<LocalWallet> {
    let key = std::env::var(key_env).map_err(|_| {
        OrchestratorError::Wallet(format!("No wallet configured. Set {}", key_env))
    })?;

    key.trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .map_err(|e| OrchestratorError::Wallet(format!("Invalid private key: {}", e)))
}

fn build_tx(
    from: Address,
    to: Address,
    data: Option<Bytes>,
    value: U256,
    nonce: U256,
    gas_limit: U256,
    gas_price: &GasPrice,
) -> TypedTransaction {
    match gas_price {
        GasPrice::Legacy(price) => {
            let mut tx = TransactionRequest::new()
                .from(from)
                .to(to)
                .value(value)
                .nonce(nonce)
                .gas(gas_limit)
                .gas_price(*price);
            if let Some(data) = data {
                tx = tx.data(data);
            }
            TypedTransaction::Legacy(tx)
        }
        GasPrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            let mut tx = Eip1559TransactionRequest::new()
                .from(from)
                .to(to)
                .value(value)
                .nonce(nonce)
                .gas(gas_limit)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas);
            if let Some(data) = data {
                tx = tx.data(data);
            }
            TypedTransaction::Eip1559(tx)
        }
    }
}

fn transport(e: OrchestratorError) -> ServiceError {
    ServiceError::Transport(e.to_string())
}

fn classify_send_error(message: String) -> ServiceError {
    if message.contains("insufficient funds")
        || message.contains("nonce too low")
        || message.contains("underpriced")
    {
        ServiceError::Rejected(message)
    } else {
        ServiceError::Transport(message)
    }
}

#[async_trait]
impl FundingSource for PrimaryWallet {
    async fn fund(&self, to: Address, amount: U256, chain_id: u64) -> Result<TxHash, ServiceError> {
        self.send(chain_id, to, None, amount).await
    }
}

#[async_trait]
impl TransferService for PrimaryWallet {
    async fn precheck(&self, params: &TransferParams) -> Result<(), ServiceError> {
        if params.from != self.address() {
            return Err(ServiceError::Rejected(format!(
                "transfer from {:?} cannot be signed by the primary wallet",
                params.from
            )));
        }

        self.require_balance(params.chain_id, params.token, params.amount)
            .await?;

        if let Some(token) = params.token {
            self.simulate(
                params.chain_id,
                token,
                TransferCall {
                    to: params.to,
                    amount: params.amount,
                }
                .encode(),
                U256::zero(),
            )
            .await?;
        }

        Ok(())
    }

    async fn execute(&self, params: &TransferParams) -> Result<TransferReceipt, ServiceError> {
        let tx_hash = match params.token {
            None => self.send(params.chain_id, params.to, None, params.amount).await?,
            Some(token) => {
                let data = TransferCall {
                    to: params.to,
                    amount: params.amount,
                }
                .encode();
                self.send(params.chain_id, token, Some(data.into()), U256::zero())
                    .await?
            }
        };

        Ok(TransferReceipt { tx_hash })
    }
}

#[async_trait]
impl VaultService for PrimaryWallet {
    async fn precheck(&self, call: &VaultCall) -> Result<(), ServiceError> {
        if call.action != VaultAction::Deposit {
            return Err(ServiceError::Rejected(
                "vault withdrawals are signed by the relay wallet".into(),
            ));
        }

        let token = (!call.native).then_some(call.token);
        self.require_balance(call.chain_id, token, call.amount).await?;

        if call.native {
            self.simulate(
                call.chain_id,
                call.vault,
                DepositAssetCall {
                    token: call.token,
                    amount: call.amount,
                }
                .encode(),
                call.amount,
            )
            .await?;
        }

        Ok(())
    }

    async fn execute(&self, call: &VaultCall) -> Result<VaultReceipt, ServiceError> {
        if !call.native {
            let allowance = self.allowance(call.chain_id, call.token, call.vault).await?;
            if allowance < call.amount {
                let approve = ApproveCall {
                    spender: call.vault,
                    amount: call.amount,
                }
                .encode();
                let approval = self
                    .send(call.chain_id, call.token, Some(approve.into()), U256::zero())
                    .await?;
                debug!("Vault allowance approved: {:?}", approval);
            }
        }

        let data = DepositAssetCall {
            token: call.token,
            amount: call.amount,
        }
        .encode();
        let value = if call.native { call.amount } else { U256::zero() };

        let tx_hash = self
            .send(call.chain_id, call.vault, Some(data.into()), value)
            .await?;

        Ok(VaultReceipt { tx_hash })
    }
}
