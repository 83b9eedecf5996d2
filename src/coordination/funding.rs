//! Relay Wallet Funding Guard
//!
//! Makes sure the relay wallet can pay gas before any step runs. When the
//! balance is below the minimum, the guard tops it up from the primary wallet
//! and watches the balance until it is visible, within a bounded number of
//! observations.

use super::retry::{PollOutcome, RetryPolicy};
use crate::error::FundingError;
use crate::events::{ProgressKind, ProgressSink};
use crate::metrics;
use crate::operations::{BalanceReader, FundingSource};

use ethers::types::{Address, TxHash, U256};
use ethers::utils::format_ether;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Derived view of a relay wallet on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayWalletState {
    pub address: Address,
    pub chain_id: u64,
    pub balance: U256,
    pub formatted_balance: String,
    pub minimum_balance: U256,
    pub needs_funding: bool,
    pub has_balance: bool,
    pub is_executing: bool,
    pub can_execute_operations: bool,
}

impl RelayWalletState {
    pub fn new(
        address: Address,
        chain_id: u64,
        balance: U256,
        minimum_balance: U256,
        is_executing: bool,
    ) -> Self {
        let needs_funding = balance < minimum_balance;
        let has_balance = !balance.is_zero();

        Self {
            address,
            chain_id,
            balance,
            formatted_balance: format_ether(balance),
            minimum_balance,
            needs_funding,
            has_balance,
            is_executing,
            can_execute_operations: has_balance && !needs_funding && !is_executing,
        }
    }
}

/// How the guard satisfied the funding requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FundingReceipt {
    /// The plan never touches the relay wallet
    NotRequired,
    AlreadyFunded,
    Funded { tx_hash: TxHash, attempts: u32 },
    /// Cross-chain leniency: proceeding without seeing the balance arrive
    Unverified { tx_hash: TxHash, attempts: u32 },
}

impl FundingReceipt {
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            FundingReceipt::Funded { tx_hash, .. } | FundingReceipt::Unverified { tx_hash, .. } => {
                Some(*tx_hash)
            }
            _ => None,
        }
    }

    pub fn is_verified(&self) -> bool {
        !matches!(self, FundingReceipt::Unverified { .. })
    }
}

pub struct FundingGuard {
    balances: Arc<dyn BalanceReader>,
    source: Arc<dyn FundingSource>,
    minimum_balance: U256,
    same_chain: RetryPolicy,
    cross_chain: RetryPolicy,
}

impl FundingGuard {
    pub fn new(
        balances: Arc<dyn BalanceReader>,
        source: Arc<dyn FundingSource>,
        minimum_balance: U256,
    ) -> Self {
        Self {
            balances,
            source,
            minimum_balance,
            same_chain: RetryPolicy::same_chain(),
            cross_chain: RetryPolicy::cross_chain(),
        }
    }

    pub fn with_policies(mut self, same_chain: RetryPolicy, cross_chain: RetryPolicy) -> Self {
        self.same_chain = same_chain;
        self.cross_chain = cross_chain;
        self
    }

    pub fn minimum_balance(&self) -> U256 {
        self.minimum_balance
    }

    /// Read the relay balance and derive its state
    pub async fn relay_state(
        &self,
        relay: Address,
        chain_id: u64,
        is_executing: bool,
    ) -> Result<RelayWalletState, FundingError> {
        let balance = self.read_balance(relay, chain_id).await?;
        metrics::set_relay_balance(chain_id, &balance);

        Ok(RelayWalletState::new(
            relay,
            chain_id,
            balance,
            self.minimum_balance,
            is_executing,
        ))
    }

    /// Top up the relay wallet if it is below the minimum balance
    #[instrument(skip(self, sink), fields(flow_id = %sink.flow_id()))]
    pub async fn ensure_funded(
        &self,
        relay: Address,
        chain_id: u64,
        required: U256,
        is_cross_chain: bool,
        sink: &ProgressSink,
    ) -> Result<FundingReceipt, FundingError> {
        let balance = self.read_balance(relay, chain_id).await?;
        if balance >= self.minimum_balance {
            debug!("Relay wallet holds {} ETH, no funding needed", format_ether(balance));
            return Ok(FundingReceipt::AlreadyFunded);
        }

        info!(
            "Funding relay wallet {:?} on chain {} with {} ETH",
            relay,
            chain_id,
            format_ether(required)
        );
        sink.emit(ProgressKind::FundingStarted {
            relay,
            chain_id,
            amount: required,
        });

        let tx_hash = self
            .source
            .fund(relay, required, chain_id)
            .await
            .map_err(|e| FundingError::TransferFailed(e.to_string()))?;

        let policy = if is_cross_chain {
            self.cross_chain
        } else {
            self.same_chain
        };

        let max_attempts = policy.max_attempts;
        let outcome = policy
            .poll(|attempt| {
                let balances = self.balances.clone();
                let minimum = self.minimum_balance;
                let sink = sink.clone();
                async move {
                    let observed = match balances.native_balance(relay, chain_id).await {
                        Ok(balance) => Some(balance),
                        Err(e) => {
                            warn!("Balance read failed on attempt {}: {}", attempt, e);
                            None
                        }
                    };
                    sink.emit(ProgressKind::FundingAttempt {
                        attempt,
                        max_attempts,
                        balance: observed,
                    });
                    observed.map_or(false, |b| b >= minimum)
                }
            })
            .await;

        metrics::record_funding_attempts(chain_id, outcome.attempts());

        let receipt = match outcome {
            PollOutcome::Satisfied { attempts } => FundingReceipt::Funded { tx_hash, attempts },
            PollOutcome::Exhausted { attempts } if policy.allows_leniency(attempts) => {
                warn!(
                    "Relay funding {:?} not visible after {} attempts, proceeding on cross-chain leniency",
                    tx_hash, attempts
                );
                metrics::record_funding_leniency(chain_id);
                FundingReceipt::Unverified { tx_hash, attempts }
            }
            PollOutcome::Exhausted { attempts } => {
                return Err(FundingError::VerificationFailed { attempts });
            }
        };

        sink.emit(ProgressKind::FundingCompleted {
            tx_hash: Some(tx_hash),
            verified: receipt.is_verified(),
        });

        Ok(receipt)
    }

    async fn read_balance(&self, relay: Address, chain_id: u64) -> Result<U256, FundingError> {
        self.balances
            .native_balance(relay, chain_id)
            .await
            .map_err(|e| FundingError::BalanceUnavailable {
                chain_id,
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::operations::{MockBalanceReader, MockFundingSource};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    const CHAIN: u64 = 84532;

    fn relay() -> Address {
        Address::repeat_byte(0x77)
    }

    fn minimum() -> U256 {
        U256::from(1_000u64)
    }

    fn funder(times: usize) -> MockFundingSource {
        let mut source = MockFundingSource::new();
        source
            .expect_fund()
            .times(times)
            .returning(|_, _, _| Ok(TxHash::repeat_byte(0xf1)));
        source
    }

    fn guard(balances: MockBalanceReader, source: MockFundingSource) -> FundingGuard {
        FundingGuard::new(Arc::new(balances), Arc::new(source), minimum())
    }

    fn sink() -> ProgressSink {
        ProgressSink::detached(Uuid::new_v4()).0
    }

    #[tokio::test]
    async fn funded_wallet_skips_transfer() {
        let mut balances = MockBalanceReader::new();
        balances
            .expect_native_balance()
            .times(1)
            .returning(|_, _| Ok(U256::from(5_000u64)));

        let receipt = guard(balances, funder(0))
            .ensure_funded(relay(), CHAIN, U256::from(3_000u64), false, &sink())
            .await
            .unwrap();

        assert_eq!(receipt, FundingReceipt::AlreadyFunded);
    }

    #[tokio::test(start_paused = true)]
    async fn same_chain_verification_gives_up_after_ten_attempts() {
        let mut balances = MockBalanceReader::new();
        balances
            .expect_native_balance()
            .times(11)
            .returning(|_, _| Ok(U256::zero()));

        let err = guard(balances, funder(1))
            .ensure_funded(relay(), CHAIN, U256::from(3_000u64), false, &sink())
            .await
            .unwrap_err();

        assert_eq!(err, FundingError::VerificationFailed { attempts: 10 });
    }

    #[tokio::test(start_paused = true)]
    async fn cross_chain_proceeds_leniently_after_exhaustion() {
        let mut balances = MockBalanceReader::new();
        balances
            .expect_native_balance()
            .times(6)
            .returning(|_, _| Ok(U256::zero()));

        let receipt = guard(balances, funder(1))
            .ensure_funded(relay(), CHAIN, U256::from(3_000u64), true, &sink())
            .await
            .unwrap();

        assert_eq!(
            receipt,
            FundingReceipt::Unverified {
                tx_hash: TxHash::repeat_byte(0xf1),
                attempts: 5
            }
        );
        assert!(!receipt.is_verified());
    }

    #[tokio::test(start_paused = true)]
    async fn leniency_requires_three_observations() {
        let mut balances = MockBalanceReader::new();
        balances
            .expect_native_balance()
            .times(3)
            .returning(|_, _| Ok(U256::zero()));

        let short = RetryPolicy {
            max_attempts: 2,
            interval: Duration::from_secs(3),
            lenient_after: Some(3),
        };

        let err = guard(balances, funder(1))
            .with_policies(RetryPolicy::same_chain(), short)
            .ensure_funded(relay(), CHAIN, U256::from(3_000u64), true, &sink())
            .await
            .unwrap_err();

        assert_eq!(err, FundingError::VerificationFailed { attempts: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn balance_appearing_mid_loop_is_verified() {
        let reads = Arc::new(AtomicU32::new(0));
        let counter = reads.clone();

        let mut balances = MockBalanceReader::new();
        balances.expect_native_balance().returning(move |_, _| {
            // initial read plus two empty polls, then the top-up lands
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 3 {
                Ok(U256::zero())
            } else {
                Ok(U256::from(3_000u64))
            }
        });

        let (sink, mut rx) = ProgressSink::detached(Uuid::new_v4());
        let receipt = guard(balances, funder(1))
            .ensure_funded(relay(), CHAIN, U256::from(3_000u64), false, &sink)
            .await
            .unwrap();

        assert_eq!(
            receipt,
            FundingReceipt::Funded {
                tx_hash: TxHash::repeat_byte(0xf1),
                attempts: 3
            }
        );
        assert_eq!(reads.load(Ordering::SeqCst), 4);

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.kind.name());
        }
        assert_eq!(
            names,
            vec![
                "funding_started",
                "funding_attempt",
                "funding_attempt",
                "funding_attempt",
                "funding_completed"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn read_errors_during_polling_count_as_misses() {
        let mut balances = MockBalanceReader::new();
        let mut seq = mockall::Sequence::new();
        balances
            .expect_native_balance()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(U256::zero()));
        balances
            .expect_native_balance()
            .times(10)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ServiceError::Transport("rpc down".into())));

        let err = guard(balances, funder(1))
            .ensure_funded(relay(), CHAIN, U256::from(3_000u64), false, &sink())
            .await
            .unwrap_err();

        assert_eq!(err, FundingError::VerificationFailed { attempts: 10 });
    }

    #[tokio::test]
    async fn failed_top_up_is_reported() {
        let mut balances = MockBalanceReader::new();
        balances
            .expect_native_balance()
            .times(1)
            .returning(|_, _| Ok(U256::zero()));

        let mut source = MockFundingSource::new();
        source
            .expect_fund()
            .returning(|_, _, _| Err(ServiceError::Reverted("insufficient funds".into())));

        let err = guard(balances, source)
            .ensure_funded(relay(), CHAIN, U256::from(3_000u64), false, &sink())
            .await
            .unwrap_err();

        assert!(matches!(err, FundingError::TransferFailed(_)));
    }

    #[test]
    fn state_derives_execution_readiness() {
        let state = RelayWalletState::new(relay(), CHAIN, U256::from(999u64), minimum(), false);
        assert!(state.needs_funding);
        assert!(state.has_balance);
        assert!(!state.can_execute_operations);

        let state = RelayWalletState::new(relay(), CHAIN, U256::from(1_000u64), minimum(), false);
        assert!(state.can_execute_operations);

        let state = RelayWalletState::new(relay(), CHAIN, U256::from(1_000u64), minimum(), true);
        assert!(!state.can_execute_operations);
    }
}
