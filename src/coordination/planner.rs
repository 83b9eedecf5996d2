//! Operation planner
//!
//! Decides which of swap/bridge a request needs and lays out the ordered step
//! list. Pure: the same request and funding flag always yield the same plan.

use super::plan::{
    Asset, ChainId, FlowMode, FlowRequest, FundingTier, FundingTiers, OperationPlan, Route,
    StepId, StepSpec,
};

use ethers::types::U256;
use ethers::utils::{format_ether, format_units};

pub struct OperationPlanner {
    tiers: FundingTiers,
}

impl OperationPlanner {
    pub fn new(tiers: FundingTiers) -> Self {
        Self { tiers }
    }

    /// Build a plan, or `None` when no asset or target has been selected.
    pub fn plan(&self, request: &FlowRequest, needs_funding: bool) -> Option<OperationPlan> {
        match request.mode {
            FlowMode::Deposit => self.plan_deposit(request, needs_funding),
            FlowMode::Withdraw => self.plan_withdraw(request, needs_funding),
        }
    }

    fn plan_deposit(&self, request: &FlowRequest, needs_funding: bool) -> Option<OperationPlan> {
        let asset = request.asset.clone()?;
        let source_chain = request.source_chain;
        let vault_chain = request.vault_chain;

        let needs_bridge = source_chain != vault_chain;
        let needs_swap = !asset.is_target_asset() && needs_bridge;

        let route = if needs_swap || needs_bridge {
            Route::Relay
        } else {
            Route::Direct
        };

        let amount = display_amount(request.amount, &asset);
        let mut steps = Vec::new();

        if route == Route::Relay {
            if needs_funding {
                steps.push(self.funding_step(needs_swap, needs_bridge));
            }
            steps.push(spec(
                StepId::TransferToRelay,
                "Transfer to relay wallet",
                format!(
                    "Move {} {} to the relay wallet on chain {}",
                    amount, asset.symbol, source_chain
                ),
            ));
            if needs_swap {
                steps.push(spec(
                    StepId::Swap,
                    "Swap to WETH",
                    format!("Swap {} {} to WETH on chain {}", amount, asset.symbol, source_chain),
                ));
            }
            if needs_bridge {
                steps.push(bridge_step(source_chain, vault_chain));
            }
        }

        steps.push(spec(
            StepId::DepositVault,
            "Deposit into vault",
            match route {
                Route::Direct => format!(
                    "Deposit {} {} into the vault from your wallet",
                    amount, asset.symbol
                ),
                Route::Relay => format!("Deposit into the vault on chain {}", vault_chain),
            },
        ));

        Some(self.finish(
            request,
            route,
            asset,
            None,
            source_chain,
            vault_chain,
            needs_swap,
            needs_bridge,
            steps,
        ))
    }

    fn plan_withdraw(&self, request: &FlowRequest, needs_funding: bool) -> Option<OperationPlan> {
        let asset = request.asset.clone()?;
        let target_chain = request.target_chain?;
        let vault_chain = request.vault_chain;

        let needs_bridge = vault_chain != target_chain;
        // ETH and WETH count as the same asset for delivery
        let converts = request.receive_asset.as_ref().map_or(false, |wanted| {
            wanted.address != asset.address
                && !(wanted.is_target_asset() && asset.is_target_asset())
        });
        let needs_swap = converts || (needs_bridge && !asset.is_target_asset());

        let amount = display_amount(request.amount, &asset);
        let mut steps = Vec::new();

        if needs_funding {
            steps.push(self.funding_step(needs_swap, needs_bridge));
        }
        steps.push(spec(
            StepId::WithdrawVault,
            "Withdraw from vault",
            format!(
                "Withdraw {} {} from the vault on chain {}",
                amount, asset.symbol, vault_chain
            ),
        ));
        if needs_swap {
            let into = request
                .receive_asset
                .as_ref()
                .map(|a| a.symbol.as_str())
                .unwrap_or("WETH");
            steps.push(spec(
                StepId::Swap,
                format!("Swap to {}", into),
                format!("Swap {} {} to {} on chain {}", amount, asset.symbol, into, vault_chain),
            ));
        }
        if needs_bridge {
            steps.push(bridge_step(vault_chain, target_chain));
        }
        steps.push(spec(
            StepId::TransferToOwner,
            "Transfer to your wallet",
            format!("Send the proceeds to your wallet on chain {}", target_chain),
        ));

        Some(self.finish(
            request,
            Route::Relay,
            asset,
            request.receive_asset.clone(),
            vault_chain,
            target_chain,
            needs_swap,
            needs_bridge,
            steps,
        ))
    }

    fn funding_step(&self, needs_swap: bool, needs_bridge: bool) -> StepSpec {
        let amount = self.tiers.amount(FundingTier::for_route(needs_swap, needs_bridge));
        spec(
            StepId::FundRelay,
            "Fund relay wallet",
            format!("Send {} ETH to the relay wallet for gas", format_ether(amount)),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        request: &FlowRequest,
        route: Route,
        asset: Asset,
        receive_asset: Option<Asset>,
        source_chain: ChainId,
        target_chain: ChainId,
        needs_swap: bool,
        needs_bridge: bool,
        steps: Vec<StepSpec>,
    ) -> OperationPlan {
        let funding_tier = FundingTier::for_route(needs_swap, needs_bridge);

        OperationPlan {
            mode: request.mode,
            route,
            owner: request.owner,
            source_chain,
            target_chain,
            vault_chain: request.vault_chain,
            asset,
            receive_asset,
            amount: request.amount,
            needs_swap,
            needs_bridge,
            steps,
            funding_tier,
            estimated_funding_amount: self.tiers.amount(funding_tier),
            estimated_duration: funding_tier.duration_label().to_string(),
        }
    }
}

fn spec(id: StepId, title: impl Into<String>, description: impl Into<String>) -> StepSpec {
    StepSpec {
        id,
        title: title.into(),
        description: description.into(),
    }
}

fn bridge_step(from: ChainId, to: ChainId) -> StepSpec {
    spec(
        StepId::Bridge,
        "Bridge to vault chain",
        format!("Bridge funds from chain {} to chain {}", from, to),
    )
}

fn display_amount(amount: U256, asset: &Asset) -> String {
    format_units(amount, asset.decimals as u32).unwrap_or_else(|_| amount.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;
    use ethers::utils::parse_ether;

    const ARBITRUM_SEPOLIA: ChainId = 421614;
    const BASE_SEPOLIA: ChainId = 84532;
    const ETH_SEPOLIA: ChainId = 11155111;

    fn planner() -> OperationPlanner {
        OperationPlanner::new(FundingTiers {
            minimum: parse_ether("0.001").unwrap(),
            medium: parse_ether("0.002").unwrap(),
            complex: parse_ether("0.003").unwrap(),
        })
    }

    fn usdc() -> Asset {
        Asset {
            address: Address::repeat_byte(0x0c),
            symbol: "USDC".into(),
            decimals: 6,
            is_native: false,
        }
    }

    fn deposit(source: ChainId, asset: Option<Asset>) -> FlowRequest {
        FlowRequest {
            mode: FlowMode::Deposit,
            owner: Address::repeat_byte(0xaa),
            source_chain: source,
            vault_chain: BASE_SEPOLIA,
            asset,
            target_chain: None,
            receive_asset: None,
            amount: U256::from(25_000_000u64),
        }
    }

    fn withdraw(asset: Asset, target: Option<ChainId>) -> FlowRequest {
        FlowRequest {
            mode: FlowMode::Withdraw,
            owner: Address::repeat_byte(0xaa),
            source_chain: BASE_SEPOLIA,
            vault_chain: BASE_SEPOLIA,
            asset: Some(asset),
            target_chain: target,
            receive_asset: None,
            amount: parse_ether("0.5").unwrap(),
        }
    }

    #[test]
    fn same_chain_eth_deposit_takes_direct_path() {
        let plan = planner()
            .plan(&deposit(BASE_SEPOLIA, Some(Asset::native_eth())), true)
            .unwrap();

        assert_eq!(plan.route, Route::Direct);
        assert!(!plan.needs_swap);
        assert!(!plan.needs_bridge);
        assert_eq!(plan.step_ids(), vec![StepId::DepositVault]);
        assert_eq!(plan.funding_tier, FundingTier::Minimum);
        assert!(plan.required_abilities().is_empty());
    }

    #[test]
    fn cross_chain_usdc_deposit_needs_everything() {
        let plan = planner()
            .plan(&deposit(ARBITRUM_SEPOLIA, Some(usdc())), true)
            .unwrap();

        assert_eq!(
            plan.step_ids(),
            vec![
                StepId::FundRelay,
                StepId::TransferToRelay,
                StepId::Swap,
                StepId::Bridge,
                StepId::DepositVault,
            ]
        );
        assert_eq!(plan.funding_tier, FundingTier::Complex);
        assert_eq!(plan.estimated_funding_amount, parse_ether("0.003").unwrap());
        assert_eq!(plan.estimated_duration, "5-10 minutes");
        assert_eq!(plan.funding_chain(), ARBITRUM_SEPOLIA);
        assert!(plan.steps[2].description.contains("25 USDC") || plan.steps[2].description.contains("25.000000 USDC"));
    }

    #[test]
    fn cross_chain_eth_deposit_only_bridges() {
        let plan = planner()
            .plan(&deposit(ETH_SEPOLIA, Some(Asset::native_eth())), false)
            .unwrap();

        assert!(!plan.needs_swap);
        assert!(plan.needs_bridge);
        assert_eq!(
            plan.step_ids(),
            vec![StepId::TransferToRelay, StepId::Bridge, StepId::DepositVault]
        );
        assert_eq!(plan.funding_tier, FundingTier::Medium);
    }

    #[test]
    fn same_chain_token_deposit_skips_swap() {
        let plan = planner().plan(&deposit(BASE_SEPOLIA, Some(usdc())), false).unwrap();

        assert!(!plan.needs_swap);
        assert_eq!(plan.route, Route::Direct);
        assert_eq!(plan.step_ids(), vec![StepId::DepositVault]);
    }

    #[test]
    fn nothing_selected_yields_no_plan() {
        assert!(planner().plan(&deposit(BASE_SEPOLIA, None), false).is_none());
        assert!(planner()
            .plan(&withdraw(Asset::native_eth(), None), false)
            .is_none());
    }

    #[test]
    fn same_chain_eth_withdraw_is_two_steps() {
        let plan = planner()
            .plan(&withdraw(Asset::native_eth(), Some(BASE_SEPOLIA)), false)
            .unwrap();

        assert_eq!(
            plan.step_ids(),
            vec![StepId::WithdrawVault, StepId::TransferToOwner]
        );
        assert_eq!(plan.route, Route::Relay);
        assert_eq!(
            plan.required_abilities(),
            vec![
                crate::session::Ability::VaultWithdraw,
                crate::session::Ability::Transfer
            ]
        );
    }

    #[test]
    fn cross_chain_token_withdraw_swaps_then_bridges() {
        let plan = planner()
            .plan(&withdraw(usdc(), Some(ARBITRUM_SEPOLIA)), true)
            .unwrap();

        assert_eq!(
            plan.step_ids(),
            vec![
                StepId::FundRelay,
                StepId::WithdrawVault,
                StepId::Swap,
                StepId::Bridge,
                StepId::TransferToOwner,
            ]
        );
        assert_eq!(plan.target_chain, ARBITRUM_SEPOLIA);
        assert_eq!(plan.funding_chain(), BASE_SEPOLIA);
    }

    #[test]
    fn withdraw_with_receive_asset_change_swaps_on_same_chain() {
        let mut request = withdraw(Asset::native_eth(), Some(BASE_SEPOLIA));
        request.receive_asset = Some(usdc());

        let plan = planner().plan(&request, false).unwrap();
        assert_eq!(
            plan.step_ids(),
            vec![StepId::WithdrawVault, StepId::Swap, StepId::TransferToOwner]
        );
        assert_eq!(plan.steps[1].title, "Swap to USDC");
    }

    #[test]
    fn eth_withdraw_to_weth_does_not_swap() {
        let mut request = withdraw(Asset::native_eth(), Some(BASE_SEPOLIA));
        request.receive_asset = Some(Asset {
            address: Address::repeat_byte(0xee),
            symbol: "WETH".into(),
            decimals: 18,
            is_native: false,
        });

        let plan = planner().plan(&request, false).unwrap();
        assert!(!plan.needs_swap);
        assert_eq!(
            plan.step_ids(),
            vec![StepId::WithdrawVault, StepId::TransferToOwner]
        );
    }

    #[test]
    fn planning_is_deterministic_and_bridge_tracks_chain_difference() {
        let planner = planner();
        for source in [ARBITRUM_SEPOLIA, BASE_SEPOLIA, ETH_SEPOLIA] {
            for asset in [Asset::native_eth(), usdc()] {
                for needs_funding in [false, true] {
                    let request = deposit(source, Some(asset.clone()));
                    let first = planner.plan(&request, needs_funding).unwrap();
                    let second = planner.plan(&request, needs_funding).unwrap();

                    assert_eq!(first.step_ids(), second.step_ids());
                    assert_eq!(first.needs_bridge, source != BASE_SEPOLIA);
                    if first.needs_swap {
                        assert!(!asset.is_target_asset());
                    }
                }
            }
        }
    }
}
