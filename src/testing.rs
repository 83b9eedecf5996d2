//! Recording test doubles for the chain-facing capabilities.

use crate::chain::{ChainDirectory, ChainRoute};
use crate::coordination::{
    ExecutionServices, ExecutorConfig, FundingGuard, FundingTiers, OperationPlanner, Orchestrator,
    StepExecutor,
};
use crate::error::ServiceError;
use crate::operations::{
    BalanceReader, BridgeParams, BridgeQuote, BridgeReceipt, BridgeService, DexService,
    FundingSource, SwapParams, SwapQuote, SwapReceipt, TransferParams, TransferReceipt,
    TransferService, VaultAction, VaultCall, VaultReceipt, VaultService,
};
use crate::session::{Ability, Session, SessionCredential, StaticSigner};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ethers::types::{Address, TxHash, H160, U256};
use ethers::utils::parse_ether;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

pub(crate) const BASE: u64 = 84532;
pub(crate) const ARBITRUM: u64 = 421614;
pub(crate) const ETH_SEPOLIA: u64 = 11155111;

pub(crate) const RELAY: Address = H160([0x22; 20]);
pub(crate) const OWNER: Address = H160([0xaa; 20]);
pub(crate) const USDC: Address = H160([0x0c; 20]);
pub(crate) const VAULT_BASE: Address = H160([0xba; 20]);
pub(crate) const WETH_BASE: Address = H160([0x4b; 20]);
pub(crate) const WETH_ARBITRUM: Address = H160([0x4a; 20]);
pub(crate) const WETH_SEPOLIA: Address = H160([0x4e; 20]);

pub(crate) fn test_directory() -> ChainDirectory {
    ChainDirectory::new([
        ChainRoute {
            chain_id: BASE,
            name: "Base Sepolia".into(),
            vault: VAULT_BASE,
            weth: WETH_BASE,
        },
        ChainRoute {
            chain_id: ARBITRUM,
            name: "Arbitrum Sepolia".into(),
            vault: H160([0xa1; 20]),
            weth: WETH_ARBITRUM,
        },
        ChainRoute {
            chain_id: ETH_SEPOLIA,
            name: "Ethereum Sepolia".into(),
            vault: H160([0xe1; 20]),
            weth: WETH_SEPOLIA,
        },
    ])
}

/// Session for `RELAY` holding every ability and a credential valid for an hour
pub(crate) fn test_session() -> Session {
    Session::new(
        Arc::new(StaticSigner::new(
            RELAY,
            [
                Ability::Swap,
                Ability::Bridge,
                Ability::VaultDeposit,
                Ability::VaultWithdraw,
                Ability::Transfer,
            ],
        )),
        Some(SessionCredential::new("test-token", Utc::now() + Duration::hours(1))),
    )
}

fn weth_for(chain_id: u64) -> Address {
    match chain_id {
        BASE => WETH_BASE,
        ARBITRUM => WETH_ARBITRUM,
        ETH_SEPOLIA => WETH_SEPOLIA,
        _ => Address::zero(),
    }
}

/// Stand-in for every execution service.
///
/// Records each call as `<service>.<phase>` and fails the calls named with
/// `fail_on`. Swaps fill at the quoted amount; bridges deliver the
/// destination chain's WETH.
#[derive(Default)]
pub(crate) struct MockChainServices {
    calls: Mutex<Vec<String>>,
    timeline: Mutex<Vec<(String, Instant)>>,
    failures: Mutex<HashSet<String>>,
    hashes: AtomicU64,
    transfers: Mutex<Vec<TransferParams>>,
    swaps: Mutex<Vec<SwapParams>>,
    bridges: Mutex<Vec<BridgeParams>>,
    vault_calls: Mutex<Vec<VaultCall>>,
}

impl MockChainServices {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every service slot backed by this mock
    pub(crate) fn services(self: &Arc<Self>) -> ExecutionServices {
        ExecutionServices {
            owner_transfer: self.clone(),
            owner_vault: self.clone(),
            relay_transfer: self.clone(),
            relay_vault: self.clone(),
            dex: self.clone(),
            bridge: self.clone(),
        }
    }

    pub(crate) fn fail_on(&self, call: &str) {
        self.failures.lock().unwrap().insert(call.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// When the first call named `call` started
    pub(crate) fn started_at(&self, call: &str) -> Option<Instant> {
        self.timeline
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == call)
            .map(|(_, at)| *at)
    }

    pub(crate) fn last_transfer(&self) -> Option<TransferParams> {
        self.transfers.lock().unwrap().last().cloned()
    }

    pub(crate) fn last_swap(&self) -> Option<SwapParams> {
        self.swaps.lock().unwrap().last().cloned()
    }

    pub(crate) fn last_bridge(&self) -> Option<BridgeParams> {
        self.bridges.lock().unwrap().last().cloned()
    }

    pub(crate) fn last_vault_call(&self) -> Option<VaultCall> {
        self.vault_calls.lock().unwrap().last().cloned()
    }

    fn record(&self, call: String) -> Result<(), ServiceError> {
        let failing = self.failures.lock().unwrap().contains(&call);
        self.calls.lock().unwrap().push(call.clone());
        self.timeline.lock().unwrap().push((call.clone(), Instant::now()));

        if failing {
            Err(ServiceError::Rejected(format!("{} failed", call)))
        } else {
            Ok(())
        }
    }

    fn next_hash(&self) -> TxHash {
        TxHash::from_low_u64_be(self.hashes.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl TransferService for MockChainServices {
    async fn precheck(&self, _params: &TransferParams) -> Result<(), ServiceError> {
        self.record("transfer.precheck".into())
    }

    async fn execute(&self, params: &TransferParams) -> Result<TransferReceipt, ServiceError> {
        self.record("transfer.execute".into())?;
        self.transfers.lock().unwrap().push(params.clone());
        Ok(TransferReceipt {
            tx_hash: self.next_hash(),
        })
    }
}

#[async_trait]
impl DexService for MockChainServices {
    async fn precheck(&self, params: &SwapParams) -> Result<SwapQuote, ServiceError> {
        self.record("swap.precheck".into())?;
        let slippage = U256::from(10_000 - params.slippage_bps);
        Ok(SwapQuote {
            amount_out: params.amount_in,
            min_amount_out: params.amount_in * slippage / U256::from(10_000u64),
        })
    }

    async fn execute(&self, params: &SwapParams) -> Result<SwapReceipt, ServiceError> {
        self.record("swap.execute".into())?;
        self.swaps.lock().unwrap().push(params.clone());
        Ok(SwapReceipt {
            tx_hash: self.next_hash(),
            amount_out: params.amount_in,
        })
    }
}

#[async_trait]
impl BridgeService for MockChainServices {
    async fn precheck(&self, params: &BridgeParams) -> Result<BridgeQuote, ServiceError> {
        self.record("bridge.precheck".into())?;
        Ok(BridgeQuote {
            destination_token: weth_for(params.destination_chain),
            amount_out: params.amount,
            fee: U256::zero(),
        })
    }

    async fn execute(&self, params: &BridgeParams) -> Result<BridgeReceipt, ServiceError> {
        self.record("bridge.execute".into())?;
        self.bridges.lock().unwrap().push(params.clone());
        Ok(BridgeReceipt {
            tx_hash: self.next_hash(),
            order_id: format!("order-{}", self.bridges.lock().unwrap().len()),
            estimated_arrival_secs: 60,
        })
    }
}

fn vault_label(action: VaultAction) -> &'static str {
    match action {
        VaultAction::Deposit => "deposit",
        VaultAction::Withdraw => "withdraw",
    }
}

#[async_trait]
impl VaultService for MockChainServices {
    async fn precheck(&self, call: &VaultCall) -> Result<(), ServiceError> {
        self.record(format!("vault.{}.precheck", vault_label(call.action)))
    }

    async fn execute(&self, call: &VaultCall) -> Result<VaultReceipt, ServiceError> {
        self.record(format!("vault.{}.execute", vault_label(call.action)))?;
        self.vault_calls.lock().unwrap().push(call.clone());
        Ok(VaultReceipt {
            tx_hash: self.next_hash(),
        })
    }
}

/// In-memory balances keyed by (holder, chain)
#[derive(Default)]
pub(crate) struct StaticBalances {
    native: Mutex<HashMap<(Address, u64), U256>>,
    assets: Mutex<HashMap<(Address, Address, u64), U256>>,
}

impl StaticBalances {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_native(&self, holder: Address, chain_id: u64, amount: U256) {
        self.native.lock().unwrap().insert((holder, chain_id), amount);
    }

    pub(crate) fn set_asset(&self, holder: Address, token: Address, chain_id: u64, amount: U256) {
        self.assets
            .lock()
            .unwrap()
            .insert((holder, token, chain_id), amount);
    }

    fn credit(&self, holder: Address, chain_id: u64, amount: U256) {
        let mut native = self.native.lock().unwrap();
        let entry = native.entry((holder, chain_id)).or_insert_with(U256::zero);
        *entry += amount;
    }
}

#[async_trait]
impl BalanceReader for StaticBalances {
    async fn native_balance(&self, address: Address, chain_id: u64) -> Result<U256, ServiceError> {
        Ok(self
            .native
            .lock()
            .unwrap()
            .get(&(address, chain_id))
            .copied()
            .unwrap_or_default())
    }

    async fn asset_balance(
        &self,
        address: Address,
        token: Address,
        chain_id: u64,
    ) -> Result<U256, ServiceError> {
        Ok(self
            .assets
            .lock()
            .unwrap()
            .get(&(address, token, chain_id))
            .copied()
            .unwrap_or_default())
    }
}

/// Funding source that credits `StaticBalances` immediately, or never
/// when built with `silent`.
pub(crate) struct CreditingFunder {
    balances: Arc<StaticBalances>,
    credits: bool,
    count: AtomicUsize,
}

impl CreditingFunder {
    pub(crate) fn new(balances: Arc<StaticBalances>) -> Self {
        Self {
            balances,
            credits: true,
            count: AtomicUsize::new(0),
        }
    }

    /// Funding transactions succeed but the balance never moves
    pub(crate) fn silent(balances: Arc<StaticBalances>) -> Self {
        Self {
            balances,
            credits: false,
            count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fund_calls(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FundingSource for CreditingFunder {
    async fn fund(&self, to: Address, amount: U256, chain_id: u64) -> Result<TxHash, ServiceError> {
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        if self.credits {
            self.balances.credit(to, chain_id, amount);
        }
        Ok(TxHash::from_low_u64_be(0xf000 + n as u64))
    }
}

/// Orchestrator over the in-memory doubles, funding tiers 0.001/0.002/0.003 ETH
pub(crate) fn test_orchestrator(
    session: Session,
    balances: Arc<StaticBalances>,
) -> (Orchestrator, Arc<MockChainServices>) {
    let tiers = FundingTiers {
        minimum: parse_ether("0.001").unwrap(),
        medium: parse_ether("0.002").unwrap(),
        complex: parse_ether("0.003").unwrap(),
    };
    let services = Arc::new(MockChainServices::new());
    let directory = Arc::new(test_directory());
    let funder = Arc::new(CreditingFunder::new(balances.clone()));

    let guard = FundingGuard::new(balances.clone(), funder, tiers.minimum);
    let executor = StepExecutor::new(
        &session,
        services.services(),
        directory.clone(),
        ExecutorConfig::default(),
    );

    let orchestrator = Orchestrator::new(
        session,
        OperationPlanner::new(tiers),
        guard,
        executor,
        balances,
        directory,
    );

    (orchestrator, services)
}
