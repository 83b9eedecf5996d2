//! Bounded polling policy used by the funding guard

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Max attempts, fixed interval between them, and an optional leniency cutoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// When set, exhaustion after at least this many attempts is tolerated
    pub lenient_after: Option<u32>,
}

impl RetryPolicy {
    pub fn same_chain() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_millis(2000),
            lenient_after: None,
        }
    }

    pub fn cross_chain() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_millis(3000),
            lenient_after: Some(3),
        }
    }

    /// Whether running out of attempts may be treated as success
    pub fn allows_leniency(&self, attempts: u32) -> bool {
        self.lenient_after.map_or(false, |min| attempts >= min)
    }

    /// Run `probe` until it reports `true` or attempts run out.
    ///
    /// The probe receives the 1-based attempt number. The policy sleeps
    /// between attempts, never after the last one.
    pub async fn poll<F, Fut>(&self, mut probe: F) -> PollOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut attempts = 0;

        while attempts < self.max_attempts {
            attempts += 1;

            if probe(attempts).await {
                return PollOutcome::Satisfied { attempts };
            }

            if attempts < self.max_attempts {
                debug!("Attempt {}/{} not satisfied, waiting {:?}", attempts, self.max_attempts, self.interval);
                tokio::time::sleep(self.interval).await;
            }
        }

        PollOutcome::Exhausted { attempts }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Satisfied { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl PollOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Satisfied { attempts } | PollOutcome::Exhausted { attempts } => *attempts,
        }
    }
}
