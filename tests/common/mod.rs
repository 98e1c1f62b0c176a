//! Shared fixtures for integration tests: an in-memory chain that answers Multicall3
//! `aggregate3` calls, and a toolkit wired to it.
#![allow(dead_code)]

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, Bytes};
use ethers::utils::id;
use position_aggregator_sdk::contract_factory::AggregatorBook;
use position_aggregator_sdk::multicall::{
    decode_aggregate3_calls, encode_aggregate3_results, CallTransport, SubCallResult,
};
use position_aggregator_sdk::network::Network;
use position_aggregator_sdk::network_provider::NetworkProviderRegistry;
use position_aggregator_sdk::position_service::PositionService;
use position_aggregator_sdk::price_feeds::StaticPriceSource;
use position_aggregator_sdk::settings::{NetworkEndpoint, PipelineSettings};
use position_aggregator_sdk::token_service::TokenService;
use position_aggregator_sdk::Toolkit;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler = Arc<dyn Fn(&[u8]) -> Option<Vec<Token>> + Send + Sync>;

/// Answers aggregated calls from per-(contract, selector) handlers.
///
/// A sub-call with no handler, or whose handler returns `None`, reverts.
#[derive(Default)]
pub struct FakeChain {
    handlers: Mutex<HashMap<(Address, [u8; 4]), Handler>>,
    batch_sizes: Mutex<Vec<usize>>,
    failures_left: AtomicUsize,
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a handler for `signature` (e.g. `"balanceOf(address)"`) on `target`.
    /// The handler receives the ABI-encoded arguments.
    pub fn on<F>(&self, target: Address, signature: &str, handler: F)
    where
        F: Fn(&[u8]) -> Option<Vec<Token>> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert((target, selector(signature)), Arc::new(handler));
    }

    /// Registers a handler that always returns `tokens`.
    pub fn returns(&self, target: Address, signature: &str, tokens: Vec<Token>) {
        self.on(target, signature, move |_| Some(tokens.clone()));
    }

    /// Makes the next `count` aggregated calls fail at the transport level.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Aggregated calls received so far, including failed ones.
    pub fn requests(&self) -> usize {
        self.batch_sizes.lock().unwrap().len()
    }

    /// Sub-call count of every aggregated call received so far.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallTransport for FakeChain {
    async fn call(&self, _to: Address, data: Bytes) -> anyhow::Result<Bytes> {
        let calls = decode_aggregate3_calls(&data)?;
        self.batch_sizes.lock().unwrap().push(calls.len());

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("connection reset by peer");
        }

        let handlers = self.handlers.lock().unwrap();
        let results: Vec<SubCallResult> = calls
            .iter()
            .map(|call| {
                let data = &call.call_data[..];
                let answer = data.get(..4).and_then(|sel| {
                    let mut key = [0u8; 4];
                    key.copy_from_slice(sel);
                    handlers.get(&(call.target, key))
                });
                match answer.and_then(|handler| handler(&data[4..])) {
                    Some(tokens) => SubCallResult {
                        success: true,
                        return_data: Bytes::from(ethers::abi::encode(&tokens)),
                    },
                    None => SubCallResult {
                        success: false,
                        return_data: Bytes::new(),
                    },
                }
            })
            .collect();
        Ok(encode_aggregate3_results(&results))
    }
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = id(signature);
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn wad(units: u64) -> ethers::types::U256 {
    ethers::types::U256::from(units) * ethers::types::U256::exp10(18)
}

/// Toolkit for `network` whose aggregated calls go to `chain` and whose base prices are
/// `prices`.
pub fn toolkit(
    network: Network,
    chain: Arc<FakeChain>,
    prices: StaticPriceSource,
    batch_size: usize,
) -> Arc<Toolkit> {
    let mut endpoints = HashMap::new();
    endpoints.insert(network, NetworkEndpoint::new("http://127.0.0.1:8545"));
    let providers = Arc::new(NetworkProviderRegistry::new(endpoints));
    providers.register_transport(network, chain);

    let positions = Arc::new(PositionService::new(PipelineSettings {
        max_retries: 2,
        retry_base_delay_ms: 2,
        retry_max_delay_ms: 10,
    }));
    let tokens = Arc::new(TokenService::new(
        Arc::new(prices),
        Arc::clone(&positions),
        Duration::from_secs(60),
    ));
    Arc::new(Toolkit::new(
        providers,
        AggregatorBook::with_defaults(),
        tokens,
        positions,
        batch_size,
    ))
}
