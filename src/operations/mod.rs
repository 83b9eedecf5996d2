//! Asset Movement Operations
//!
//! One wrapper per step kind. Every wrapper runs its external service in two
//! phases: a precheck that must succeed, then the execute call. Each phase
//! gets its own deadline; neither is retried here.

pub mod bridge;
pub mod capability;
pub mod outcome;
pub mod swap;
pub mod transfer;
pub mod vault;

pub use bridge::BridgeOperation;
pub use capability::*;
pub use outcome::StepOutcome;
pub use swap::SwapOperation;
pub use transfer::TransferOperation;
pub use vault::VaultOperation;

use crate::coordination::StepId;
use crate::error::{OperationError, ServiceError};

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Run `precheck`, and only if it succeeds, `execute`.
pub async fn two_phase<Q, R, P, E, EFut>(
    step: StepId,
    deadline: Duration,
    precheck: P,
    execute: E,
) -> Result<(Q, R), OperationError>
where
    P: Future<Output = Result<Q, ServiceError>>,
    E: FnOnce() -> EFut,
    EFut: Future<Output = Result<R, ServiceError>>,
{
    let quote = match timeout(deadline, precheck).await {
        Ok(Ok(quote)) => quote,
        Ok(Err(source)) => return Err(OperationError::Precheck { step, source }),
        Err(_) => {
            return Err(OperationError::Timeout {
                step,
                phase: "precheck",
                secs: deadline.as_secs(),
            })
        }
    };

    debug!("Precheck for {} passed", step);

    match timeout(deadline, execute()).await {
        Ok(Ok(receipt)) => Ok((quote, receipt)),
        Ok(Err(source)) => Err(OperationError::Execution { step, source }),
        Err(_) => Err(OperationError::Timeout {
            step,
            phase: "execute",
            secs: deadline.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn failed_precheck_skips_execute() {
        let executed = AtomicBool::new(false);
        let flag = &executed;

        let result: Result<((), ()), _> = two_phase(
            StepId::Swap,
            Duration::from_secs(5),
            async { Err(ServiceError::Rejected("price impact".into())) },
            || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(OperationError::Precheck { step: StepId::Swap, .. })
        ));
        assert!(!executed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn execution_failure_keeps_step() {
        let result: Result<(u8, ()), _> = two_phase(
            StepId::Bridge,
            Duration::from_secs(5),
            async { Ok(1u8) },
            || async { Err(ServiceError::Reverted("out of gas".into())) },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.step(), StepId::Bridge);
        assert!(matches!(err, OperationError::Execution { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_execute_hits_deadline() {
        let result: Result<((), ()), _> = two_phase(
            StepId::DepositVault,
            Duration::from_secs(30),
            async { Ok(()) },
            || std::future::pending::<Result<(), ServiceError>>(),
        )
        .await;

        assert_eq!(
            result.unwrap_err(),
            OperationError::Timeout {
                step: StepId::DepositVault,
                phase: "execute",
                secs: 30,
            }
        );
    }
}
