// src/price_feeds.rs
//
// Base token price sources. A source answers "USD price of token X on network N" for the
// tokens it knows; the token service layers caching and app-token fallback on top.

use crate::contract_factory::{AggregatorBook, ContractFactory};
use crate::multicall::{Deferred, Multicall};
use crate::network::Network;
use crate::network_provider::NetworkProviderRegistry;
use crate::normalization::normalize_amount;
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, I256, U256};
use log::{debug, warn};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait TokenPriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Every USD price this source knows on `network`.
    async fn token_prices(&self, network: Network) -> Result<HashMap<Address, Decimal>>;

    async fn token_price(&self, network: Network, address: Address) -> Result<Option<Decimal>> {
        Ok(self.token_prices(network).await?.get(&address).copied())
    }
}

/// Fixed prices, typically stablecoins pinned to 1 or test fixtures.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceSource {
    prices: HashMap<Network, HashMap<Address, Decimal>>,
}

impl StaticPriceSource {
    pub fn new(prices: HashMap<Network, HashMap<Address, Decimal>>) -> Self {
        Self { prices }
    }

    pub fn with_price(mut self, network: Network, address: Address, price: Decimal) -> Self {
        self.prices.entry(network).or_default().insert(address, price);
        self
    }
}

#[async_trait]
impl TokenPriceSource for StaticPriceSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn token_prices(&self, network: Network) -> Result<HashMap<Address, Decimal>> {
        Ok(self.prices.get(&network).cloned().unwrap_or_default())
    }
}

/// Chainlink USD feeds, all read in one batch per network.
pub struct ChainlinkPriceSource {
    providers: Arc<NetworkProviderRegistry>,
    contracts: ContractFactory,
    aggregators: AggregatorBook,
    batch_size: usize,
    /// token -> USD feed
    feeds: HashMap<Network, HashMap<Address, Address>>,
}

impl ChainlinkPriceSource {
    pub fn new(
        providers: Arc<NetworkProviderRegistry>,
        aggregators: AggregatorBook,
        batch_size: usize,
        feeds: HashMap<Network, HashMap<Address, Address>>,
    ) -> Self {
        Self {
            contracts: ContractFactory::new(Arc::clone(&providers)),
            providers,
            aggregators,
            batch_size,
            feeds,
        }
    }
}

#[async_trait]
impl TokenPriceSource for ChainlinkPriceSource {
    fn name(&self) -> &str {
        "chainlink"
    }

    async fn token_prices(&self, network: Network) -> Result<HashMap<Address, Decimal>> {
        let Some(feeds) = self.feeds.get(&network).filter(|f| !f.is_empty()) else {
            return Ok(HashMap::new());
        };

        let multicall = Multicall::new(
            network,
            self.providers.transport(network)?,
            self.aggregators.aggregator_address(network)?,
            self.batch_size,
        );

        let mut pending: Vec<(Address, Deferred<_>, Deferred<u8>)> = Vec::with_capacity(feeds.len());
        for (token, feed) in feeds {
            let aggregator = self.contracts.chainlink_aggregator(network, *feed)?;
            let batched = multicall.wrap(&aggregator);
            pending.push((
                *token,
                batched.call(|c| c.latest_round_data()),
                batched.call(|c| c.decimals()),
            ));
        }

        let mut prices = HashMap::with_capacity(pending.len());
        for (token, round, decimals) in pending {
            let (round, decimals) = match (round.await, decimals.await) {
                (Ok(round), Ok(decimals)) => (round, decimals),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Chainlink feed for {:?} on {} unreadable: {}", token, network, e);
                    continue;
                }
            };
            let (_, answer, _, _, _) = round;
            let Some(answer) = positive_answer(answer) else {
                warn!(
                    "Chainlink feed for {:?} on {} returned non-positive answer {}",
                    token, network, answer
                );
                continue;
            };
            match normalize_amount(answer, decimals) {
                Ok(price) => {
                    prices.insert(token, price);
                }
                Err(e) => warn!("Chainlink answer for {:?} on {} unusable: {}", token, network, e),
            }
        }
        debug!("Chainlink returned {} price(s) on {}", prices.len(), network);
        Ok(prices)
    }
}

/// Chainlink answers are `int256`; only strictly positive ones are prices.
fn positive_answer(answer: I256) -> Option<U256> {
    if answer <= I256::zero() {
        return None;
    }
    Some(answer.into_raw())
}

/// Queries sources in order; the first source that knows a token's price wins.
///
/// A failing source is logged and skipped.
pub struct FallbackPriceSource {
    sources: Vec<Arc<dyn TokenPriceSource>>,
}

impl FallbackPriceSource {
    pub fn new(sources: Vec<Arc<dyn TokenPriceSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl TokenPriceSource for FallbackPriceSource {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn token_prices(&self, network: Network) -> Result<HashMap<Address, Decimal>> {
        let mut merged = HashMap::new();
        for source in &self.sources {
            match source.token_prices(network).await {
                Ok(prices) => {
                    for (token, price) in prices {
                        merged.entry(token).or_insert(price);
                    }
                }
                Err(e) => warn!("Price source {} failed on {}: {:#}", source.name(), network, e),
            }
        }
        Ok(merged)
    }
}
