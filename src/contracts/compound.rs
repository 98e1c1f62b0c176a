use ethers::prelude::abigen;

// cETH has no `underlying()`; callers map that revert to the wrapped native token.
abigen!(
    CompoundCToken,
    r#"[
        function underlying() external view returns (address)
    ]"#
);
