//! Integration tests for batched contract reads through typed bindings

mod common;

use common::{addr, toolkit, wad, FakeChain};
use ethers::abi::Token;
use ethers::types::U256;
use ethers::utils::format_bytes32_string;
use position_aggregator_sdk::app_toolkit::AppToolkit;
use position_aggregator_sdk::network::Network;
use position_aggregator_sdk::price_feeds::StaticPriceSource;
use position_aggregator_sdk::SdkError;

fn erc20(chain: &FakeChain, byte: u8, symbol: &str, decimals: u8, supply: U256) {
    let token = addr(byte);
    chain.returns(token, "symbol()", vec![Token::String(symbol.to_string())]);
    chain.returns(token, "decimals()", vec![Token::Uint(U256::from(decimals))]);
    chain.returns(token, "totalSupply()", vec![Token::Uint(supply)]);
}

/// Reads recorded through typed bindings resolve from a single aggregated call
#[tokio::test]
async fn test_typed_reads_share_one_aggregated_call() {
    let chain = FakeChain::new();
    erc20(&chain, 0x01, "DAI", 18, wad(1_000));
    erc20(&chain, 0x02, "USDC", 6, U256::from(5_000_000u64));

    let toolkit = toolkit(Network::Ethereum, chain.clone(), StaticPriceSource::default(), 200);
    let multicall = toolkit.multicall(Network::Ethereum).unwrap();
    let dai = toolkit.contracts().erc20(Network::Ethereum, addr(0x01)).unwrap();
    let usdc = toolkit.contracts().erc20(Network::Ethereum, addr(0x02)).unwrap();

    let dai_symbol = multicall.wrap(&dai).call(|t| t.symbol());
    let dai_supply = multicall.wrap(&dai).call(|t| t.total_supply());
    let usdc_decimals = multicall.wrap(&usdc).call(|t| t.decimals());
    assert_eq!(multicall.pending(), 3);

    assert_eq!(usdc_decimals.await.unwrap(), 6);
    assert_eq!(dai_symbol.await.unwrap(), "DAI");
    assert_eq!(dai_supply.await.unwrap(), wad(1_000));
    assert_eq!(chain.batch_sizes(), vec![3]);
}

/// A reverting token fails only its own metadata entry
#[tokio::test]
async fn test_token_metadata_isolates_reverting_tokens() {
    let chain = FakeChain::new();
    erc20(&chain, 0x01, "DAI", 18, wad(10));
    // MKR-style bytes32 symbol
    chain.returns(
        addr(0x03),
        "symbol()",
        vec![Token::FixedBytes(format_bytes32_string("MKR").unwrap().to_vec())],
    );
    chain.returns(addr(0x03), "decimals()", vec![Token::Uint(U256::from(18))]);
    chain.returns(addr(0x03), "totalSupply()", vec![Token::Uint(wad(7))]);
    // 0x04 has no handlers and reverts every call

    let toolkit = toolkit(Network::Ethereum, chain.clone(), StaticPriceSource::default(), 200);
    let multicall = toolkit.multicall(Network::Ethereum).unwrap();
    let metadata = toolkit
        .token_metadata(&multicall, &[addr(0x01), addr(0x04), addr(0x03)])
        .await;

    assert_eq!(metadata.len(), 3);
    assert_eq!(metadata[0].as_ref().unwrap().symbol, "DAI");
    assert!(matches!(metadata[1], Err(SdkError::Decode { .. })));
    let mkr = metadata[2].as_ref().unwrap();
    assert_eq!((mkr.symbol.as_str(), mkr.decimals, mkr.total_supply), ("MKR", 18, wad(7)));
    assert_eq!(chain.requests(), 1);
}

/// Symbols and decimals are cached; only supplies are read again
#[tokio::test]
async fn test_token_metadata_rereads_only_supply() {
    let chain = FakeChain::new();
    erc20(&chain, 0x01, "DAI", 18, wad(10));

    let toolkit = toolkit(Network::Ethereum, chain.clone(), StaticPriceSource::default(), 200);
    let first = toolkit.multicall(Network::Ethereum).unwrap();
    toolkit.token_metadata(&first, &[addr(0x01)]).await;
    let second = toolkit.multicall(Network::Ethereum).unwrap();
    let again = toolkit.token_metadata(&second, &[addr(0x01)]).await;

    assert_eq!(again[0].as_ref().unwrap().symbol, "DAI");
    assert_eq!(chain.batch_sizes(), vec![3, 1]);
}

/// Full batches are sealed and sent in order by one flush
#[tokio::test]
async fn test_batches_split_at_configured_size() {
    let chain = FakeChain::new();
    for byte in 1..=5u8 {
        erc20(&chain, byte, "TKN", 18, wad(byte as u64));
    }

    let toolkit = toolkit(Network::Ethereum, chain.clone(), StaticPriceSource::default(), 2);
    let multicall = toolkit.multicall(Network::Ethereum).unwrap();
    let tokens: Vec<_> = (1..=5u8)
        .map(|byte| toolkit.contracts().erc20(Network::Ethereum, addr(byte)).unwrap())
        .collect();
    let supplies: Vec<_> = tokens
        .iter()
        .map(|token| multicall.wrap(token).call(|t| t.total_supply()).resolve())
        .collect();

    let supplies = futures::future::try_join_all(supplies).await.unwrap();
    assert_eq!(supplies, (1..=5u64).map(wad).collect::<Vec<_>>());
    assert_eq!(chain.batch_sizes(), vec![2, 2, 1]);
}

/// A transport failure reaches every read of the batch as a batch execution error
#[tokio::test]
async fn test_transport_failure_fails_the_whole_batch() {
    let chain = FakeChain::new();
    erc20(&chain, 0x01, "DAI", 18, wad(10));
    chain.fail_next(1);

    let toolkit = toolkit(Network::Ethereum, chain.clone(), StaticPriceSource::default(), 200);
    let multicall = toolkit.multicall(Network::Ethereum).unwrap();
    let dai = toolkit.contracts().erc20(Network::Ethereum, addr(0x01)).unwrap();
    let symbol = multicall.wrap(&dai).call(|t| t.symbol());
    let supply = multicall.wrap(&dai).call(|t| t.total_supply());

    assert!(matches!(symbol.await, Err(SdkError::BatchExecution { calls: 2, .. })));
    assert!(matches!(supply.await, Err(SdkError::BatchExecution { calls: 2, .. })));

    // The collector is usable again afterwards.
    let retry = multicall.wrap(&dai).call(|t| t.total_supply());
    assert_eq!(retry.await.unwrap(), wad(10));
    assert_eq!(chain.requests(), 2);
}

/// Unconfigured networks are rejected before any read is recorded
#[tokio::test]
async fn test_unconfigured_network_has_no_collector() {
    let chain = FakeChain::new();
    let toolkit = toolkit(Network::Ethereum, chain, StaticPriceSource::default(), 200);
    assert!(matches!(
        toolkit.multicall(Network::Fantom),
        Err(SdkError::UnsupportedNetwork { .. })
    ));
}
