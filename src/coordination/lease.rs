//! Single-owner leases on relay wallets
//!
//! Two flows sending from the same wallet would race on nonces, so a flow
//! holds the wallet's lease from planning until it terminates.

use crate::error::{OrchestratorError, OrchestratorResult};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct RelayLocks {
    /// Relay wallet -> flow currently holding it
    active: Arc<DashMap<Address, Uuid>>,
}

impl RelayLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the wallet for `flow_id`, or fail if another flow holds it
    pub fn try_acquire(&self, relay: Address, flow_id: Uuid) -> OrchestratorResult<RelayLease> {
        match self.active.entry(relay) {
            Entry::Occupied(holder) => {
                debug!("Relay wallet {:?} busy with flow {}", relay, holder.get());
                Err(OrchestratorError::RelayWalletBusy {
                    address: format!("{:?}", relay),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(flow_id);
                Ok(RelayLease {
                    relay,
                    flow_id,
                    active: self.active.clone(),
                })
            }
        }
    }

    pub fn is_executing(&self, relay: Address) -> bool {
        self.active.contains_key(&relay)
    }

    pub fn holder(&self, relay: Address) -> Option<Uuid> {
        self.active.get(&relay).map(|entry| *entry.value())
    }
}

/// Released when dropped
#[derive(Debug)]
pub struct RelayLease {
    relay: Address,
    flow_id: Uuid,
    active: Arc<DashMap<Address, Uuid>>,
}

impl RelayLease {
    pub fn relay(&self) -> Address {
        self.relay
    }
}

impl Drop for RelayLease {
    fn drop(&mut self) {
        self.active
            .remove_if(&self.relay, |_, holder| *holder == self.flow_id);
        debug!("Released relay wallet {:?} from flow {}", self.relay, self.flow_id);
    }
}
