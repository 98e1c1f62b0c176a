//! Integration tests for Morpho-Compound markets, balances and product summaries

mod common;

use common::{addr, toolkit, wad, FakeChain};
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, U256};
use position_aggregator_sdk::adapters::morpho::{
    MorphoBalanceFetcher, MorphoCompoundContractPositionFetcher, MorphoCompoundParams,
    MORPHO_COMPOUND_LENS_ADDRESS, MORPHO_COMPOUND_PRODUCT_LABEL, WRAPPED_NATIVE_ADDRESS,
};
use position_aggregator_sdk::app_toolkit::{AppToolkit, Toolkit};
use position_aggregator_sdk::network::Network;
use position_aggregator_sdk::position_fetcher::BalanceFetcher;
use position_aggregator_sdk::price_feeds::StaticPriceSource;
use position_aggregator_sdk::types::conversions::address_to_string;
use position_aggregator_sdk::types::display::DisplayItem;
use position_aggregator_sdk::types::position::{MetaType, PositionBalance};
use rust_decimal::Decimal;
use std::sync::Arc;

const C_DAI: u8 = 0x51;
const C_ETH: u8 = 0x52;
const DAI: u8 = 0x61;
const USER: u8 = 0x99;

fn lens() -> Address {
    MORPHO_COMPOUND_LENS_ADDRESS.parse().unwrap()
}

fn weth() -> Address {
    WRAPPED_NATIVE_ADDRESS.parse().unwrap()
}

fn pool_token(args: &[u8]) -> Option<Address> {
    args.get(12..32).map(Address::from_slice)
}

fn erc20(chain: &FakeChain, token: Address, symbol: &str) {
    chain.returns(token, "symbol()", vec![Token::String(symbol.to_string())]);
    chain.returns(token, "decimals()", vec![Token::Uint(U256::from(18))]);
    chain.returns(token, "totalSupply()", vec![Token::Uint(wad(1_000_000))]);
}

/// Two markets; the user supplies 100 DAI and borrows 40 DAI, and has no cETH position.
fn morpho_chain(with_balance_states: bool) -> Arc<FakeChain> {
    let chain = FakeChain::new();
    chain.returns(
        lens(),
        "getAllMarkets()",
        vec![Token::Array(vec![Token::Address(addr(C_DAI)), Token::Address(addr(C_ETH))])],
    );
    chain.returns(addr(C_DAI), "underlying()", vec![Token::Address(addr(DAI))]);
    // cETH has no underlying() and reverts.
    erc20(&chain, addr(DAI), "DAI");
    erc20(&chain, weth(), "WETH");

    let totals = |balance: U256| vec![Token::Uint(U256::zero()), Token::Uint(balance), Token::Uint(balance)];
    chain.on(lens(), "getCurrentSupplyBalanceInOf(address,address)", move |args| {
        let balance = if pool_token(args)? == addr(C_DAI) { wad(100) } else { U256::zero() };
        Some(totals(balance))
    });
    chain.on(lens(), "getCurrentBorrowBalanceInOf(address,address)", move |args| {
        let balance = if pool_token(args)? == addr(C_DAI) { wad(40) } else { U256::zero() };
        Some(totals(balance))
    });

    if with_balance_states {
        chain.on(lens(), "getUserBalanceStates(address,address[])", |args| {
            let decoded = ethers::abi::decode(
                &[ParamType::Address, ParamType::Array(Box::new(ParamType::Address))],
                args,
            )
            .ok()?;
            // Only markets the user holds are passed in.
            let expected = Token::Array(vec![Token::Address(addr(C_DAI))]);
            (decoded[1] == expected).then(|| {
                vec![Token::Uint(wad(100)), Token::Uint(wad(40)), Token::Uint(wad(80))]
            })
        });
    }
    chain
}

fn prices() -> StaticPriceSource {
    StaticPriceSource::default()
        .with_price(Network::Ethereum, addr(DAI), Decimal::ONE)
        .with_price(Network::Ethereum, weth(), Decimal::from(2_000))
}

async fn toolkit_with_markets(chain: Arc<FakeChain>) -> Arc<Toolkit> {
    let toolkit = toolkit(Network::Ethereum, chain, prices(), 200);
    let fetcher = MorphoCompoundContractPositionFetcher::new(toolkit.clone(), MorphoCompoundParams::default());
    let report = toolkit.positions().compute_contract_positions(&fetcher).await;
    assert!(report.is_complete(), "market errors: {:?}", report.errors);
    toolkit
}

/// Markets carry their underlying as supplied and borrowed tokens
#[tokio::test]
async fn test_markets_resolve_underlyings() {
    let chain = morpho_chain(true);
    let toolkit = toolkit(Network::Ethereum, chain.clone(), prices(), 200);
    let fetcher = MorphoCompoundContractPositionFetcher::new(toolkit.clone(), MorphoCompoundParams::default());
    let report = toolkit.positions().compute_contract_positions(&fetcher).await;

    assert_eq!(report.positions.len(), 2);
    let dai_market = &report.positions[0];
    assert_eq!(dai_market.address, address_to_string(addr(C_DAI)));
    assert_eq!(dai_market.data_props.market_address, dai_market.address);
    assert_eq!(dai_market.display_props.label, "DAI");
    let meta_types: Vec<_> = dai_market.tokens.iter().map(|t| t.meta_type).collect();
    assert_eq!(meta_types, vec![Some(MetaType::Supplied), Some(MetaType::Borrowed)]);

    // cETH falls back to the wrapped native token.
    let eth_market = &report.positions[1];
    assert_eq!(eth_market.tokens[0].symbol, "WETH");
    assert_eq!(eth_market.tokens[0].price, Decimal::from(2_000));

    // Markets, underlyings, then metadata of both tokens.
    assert_eq!(chain.batch_sizes(), vec![1, 2, 6]);
}

/// An underlying without a price leaves its market out
#[tokio::test]
async fn test_unpriced_market_is_omitted() {
    let chain = morpho_chain(true);
    let prices = StaticPriceSource::default().with_price(Network::Ethereum, addr(DAI), Decimal::ONE);
    let toolkit = toolkit(Network::Ethereum, chain, prices, 200);
    let fetcher = MorphoCompoundContractPositionFetcher::new(toolkit.clone(), MorphoCompoundParams::default());
    let report = toolkit.positions().compute_contract_positions(&fetcher).await;

    assert_eq!(report.positions.len(), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].instance, address_to_string(addr(C_ETH)));
    assert_eq!(report.errors[0].code, "price_unavailable");
}

/// An underlying answering with malformed data fails only its own market
#[tokio::test]
async fn test_malformed_underlying_is_not_mistaken_for_ceth() {
    let chain = morpho_chain(true);
    // A successful call with no return data.
    chain.on(addr(C_ETH), "underlying()", |_| Some(Vec::new()));
    let toolkit = toolkit(Network::Ethereum, chain, prices(), 200);
    let fetcher = MorphoCompoundContractPositionFetcher::new(toolkit.clone(), MorphoCompoundParams::default());
    let report = toolkit.positions().compute_contract_positions(&fetcher).await;

    assert_eq!(report.positions.len(), 1);
    assert_eq!(report.positions[0].address, address_to_string(addr(C_DAI)));
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].instance, address_to_string(addr(C_ETH)));
    assert_eq!(report.errors[0].code, "decode");
    assert!(report.errors[0].message.contains("underlying"));
}

/// Balances are grouped into one product with lens-backed summary lines
#[tokio::test]
async fn test_balances_are_presented_with_lending_summary() {
    let chain = morpho_chain(true);
    let toolkit = toolkit_with_markets(chain.clone()).await;
    let fetcher = MorphoBalanceFetcher::new(toolkit.clone(), MorphoCompoundParams::default());
    let response = fetcher.get_balances(addr(USER)).await.unwrap();

    assert!(response.error.is_none());
    assert_eq!(response.products.len(), 1);
    let product = &response.products[0];
    assert_eq!(product.label, MORPHO_COMPOUND_PRODUCT_LABEL);
    assert_eq!(product.assets.len(), 1);

    let PositionBalance::ContractPosition(balance) = &product.assets[0] else {
        panic!("expected a contract position balance");
    };
    assert_eq!(balance.tokens[0].balance, Decimal::from(100));
    assert_eq!(balance.tokens[1].balance, Decimal::from(-40));
    assert_eq!(balance.balance_usd, Decimal::from(60));

    let meta: Vec<_> = product.meta.iter().map(|m| (m.label.as_str(), m.value.clone())).collect();
    assert_eq!(
        meta,
        vec![
            ("Collateral", DisplayItem::Dollar(Decimal::from(80))),
            ("Total Supply", DisplayItem::Dollar(Decimal::from(100))),
            ("Debt", DisplayItem::Dollar(Decimal::from(40))),
            ("Utilization Rate", DisplayItem::Pct(Decimal::new(5, 1))),
        ]
    );

    assert_eq!(response.meta[0].value, DisplayItem::Dollar(Decimal::from(60)));
    assert_eq!(response.meta[1].value, DisplayItem::Dollar(Decimal::from(100)));
    assert_eq!(response.meta[2].value, DisplayItem::Dollar(Decimal::from(40)));
}

/// A failing summary read keeps the balances and reports the error
#[tokio::test]
async fn test_summary_failure_is_reported_on_the_response() {
    let chain = morpho_chain(false);
    let toolkit = toolkit_with_markets(chain).await;
    let fetcher = MorphoBalanceFetcher::new(toolkit.clone(), MorphoCompoundParams::default());
    let response = fetcher.get_balances(addr(USER)).await.unwrap();

    assert_eq!(response.products.len(), 1);
    assert!(response.products[0].meta.is_empty());
    assert!(response.error.as_deref().unwrap_or_default().contains("getUserBalanceStates"));
}

/// A market whose balance read reverts is skipped; the others are still returned
#[tokio::test]
async fn test_failing_market_does_not_hide_the_others() {
    let chain = morpho_chain(true);
    let toolkit = toolkit_with_markets(chain.clone()).await;

    let totals = |balance: U256| vec![Token::Uint(U256::zero()), Token::Uint(balance), Token::Uint(balance)];
    chain.on(lens(), "getCurrentSupplyBalanceInOf(address,address)", move |args| {
        let balance = if pool_token(args)? == addr(C_DAI) { wad(100) } else { wad(2) };
        Some(totals(balance))
    });
    chain.on(lens(), "getCurrentBorrowBalanceInOf(address,address)", move |args| {
        (pool_token(args)? == addr(C_DAI)).then(|| totals(wad(40)))
    });

    let fetcher = MorphoBalanceFetcher::new(toolkit.clone(), MorphoCompoundParams::default());
    let response = fetcher.get_balances(addr(USER)).await.unwrap();

    assert_eq!(response.products.len(), 1);
    let product = &response.products[0];
    assert_eq!(product.assets.len(), 1);
    let PositionBalance::ContractPosition(balance) = &product.assets[0] else {
        panic!("expected a contract position balance");
    };
    assert_eq!(balance.position.address, address_to_string(addr(C_DAI)));
    assert_eq!(product.meta.len(), 4);

    let error = response.error.unwrap_or_default();
    assert!(error.contains(&address_to_string(addr(C_ETH))));
    assert!(error.contains("getCurrentBorrowBalanceInOf"));
}

/// Every failure of one query is kept on the response
#[tokio::test]
async fn test_failures_are_joined_on_the_response() {
    let chain = morpho_chain(false);
    let toolkit = toolkit_with_markets(chain.clone()).await;
    chain.on(lens(), "getCurrentSupplyBalanceInOf(address,address)", move |args| {
        let balance = if pool_token(args)? == addr(C_DAI) { wad(100) } else { wad(2) };
        Some(vec![Token::Uint(U256::zero()), Token::Uint(balance), Token::Uint(balance)])
    });
    chain.on(lens(), "getCurrentBorrowBalanceInOf(address,address)", move |args| {
        (pool_token(args)? == addr(C_DAI))
            .then(|| vec![Token::Uint(U256::zero()), Token::Uint(wad(40)), Token::Uint(wad(40))])
    });

    let fetcher = MorphoBalanceFetcher::new(toolkit.clone(), MorphoCompoundParams::default());
    let response = fetcher.get_balances(addr(USER)).await.unwrap();

    assert_eq!(response.products.len(), 1);
    let error = response.error.unwrap_or_default();
    assert!(error.contains("getCurrentBorrowBalanceInOf"));
    assert!(error.contains("getUserBalanceStates"));
    assert_eq!(error.split("; ").count(), 2);
}

/// Without registered markets a wallet has no products
#[tokio::test]
async fn test_no_markets_means_no_products() {
    let chain = morpho_chain(true);
    let toolkit = toolkit(Network::Ethereum, chain.clone(), prices(), 200);
    let fetcher = MorphoBalanceFetcher::new(toolkit.clone(), MorphoCompoundParams::default());
    let response = fetcher.get_balances(addr(USER)).await.unwrap();

    assert!(response.products.is_empty());
    assert_eq!(response.meta[0].value, DisplayItem::Dollar(Decimal::ZERO));
    assert!(chain.batch_sizes().is_empty());
    assert!(toolkit.app_contract_positions(&[]).is_empty());
}
