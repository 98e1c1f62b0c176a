use ethers::prelude::abigen;

abigen!(
    MorphoCompoundLens,
    r#"[
        function getAllMarkets() external view returns (address[])
        function getCurrentSupplyBalanceInOf(address poolToken, address user) external view returns (uint256 balanceOnPool, uint256 balanceInP2P, uint256 totalBalance)
        function getCurrentBorrowBalanceInOf(address poolToken, address user) external view returns (uint256 balanceOnPool, uint256 balanceInP2P, uint256 totalBalance)
        function getUserBalanceStates(address user, address[] updatedMarkets) external view returns (uint256 collateralValue, uint256 debtValue, uint256 maxDebtValue)
    ]"#
);
