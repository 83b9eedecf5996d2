//! Static routing table: vault and WETH deployment per chain id

use crate::config::Settings;

use ethers::types::Address;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRoute {
    pub chain_id: u64,
    pub name: String,
    pub vault: Address,
    pub weth: Address,
}

#[derive(Debug, Clone, Default)]
pub struct ChainDirectory {
    routes: HashMap<u64, ChainRoute>,
}

impl ChainDirectory {
    pub fn new(routes: impl IntoIterator<Item = ChainRoute>) -> Self {
        Self {
            routes: routes.into_iter().map(|r| (r.chain_id, r)).collect(),
        }
    }

    /// Build from every enabled chain in the settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.enabled_chains().into_iter().map(|(_, c)| ChainRoute {
            chain_id: c.chain_id,
            name: c.name.clone(),
            vault: c.vault_address,
            weth: c.weth_address,
        }))
    }

    pub fn contains(&self, chain_id: u64) -> bool {
        self.routes.contains_key(&chain_id)
    }

    pub fn route(&self, chain_id: u64) -> Option<&ChainRoute> {
        self.routes.get(&chain_id)
    }

    pub fn vault(&self, chain_id: u64) -> Option<Address> {
        self.route(chain_id).map(|r| r.vault)
    }

    pub fn weth(&self, chain_id: u64) -> Option<Address> {
        self.route(chain_id).map(|r| r.weth)
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.routes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_chains_only() {
        let directory = ChainDirectory::new([ChainRoute {
            chain_id: 84532,
            name: "Base Sepolia".into(),
            vault: Address::repeat_byte(0xba),
            weth: Address::repeat_byte(0x42),
        }]);

        assert!(directory.contains(84532));
        assert_eq!(directory.vault(84532), Some(Address::repeat_byte(0xba)));
        assert_eq!(directory.weth(84532), Some(Address::repeat_byte(0x42)));
        assert_eq!(directory.vault(421614), None);
    }
}
