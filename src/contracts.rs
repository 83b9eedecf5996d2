//! Contract bindings used by the primary wallet and the chain readers

use ethers::contract::abigen;

abigen!(
    Erc20,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#
);

abigen!(
    AssetVault,
    r#"[
        function depositAsset(address token, uint256 amount) external payable
        function withdrawAsset(address token, uint256 amount) external
    ]"#
);
