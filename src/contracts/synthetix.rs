use ethers::prelude::abigen;

abigen!(
    SynthetixAddressResolver,
    r#"[
        function getAddress(bytes32 name) external view returns (address)
        function getSynth(bytes32 key) external view returns (address)
    ]"#
);

abigen!(
    SynthetixSummaryUtil,
    r#"[
        function synthsRates() external view returns (bytes32[], uint256[])
    ]"#
);

// Synth implementation contract; `proxy()` is the token users hold.
abigen!(
    SynthetixNetworkToken,
    r#"[
        function proxy() external view returns (address)
        function totalSupply() external view returns (uint256)
    ]"#
);
