// src/coingecko_price_source.rs

use crate::network::Network;
use crate::price_feeds::TokenPriceSource;
use crate::settings::CoinGeckoSettings;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::Address;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

type DefaultDirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

// simple/price returns { "<coin id>": { "usd": <price> } }
type CoinGeckoPriceResponse = HashMap<String, CoinGeckoTokenPrice>;

#[derive(Debug, Deserialize)]
struct CoinGeckoTokenPrice {
    usd: Option<Decimal>,
}

/// USD prices from the CoinGecko `simple/price` endpoint.
///
/// Requests are rate limited to the configured requests per minute and responses are
/// cached per network for `cache_ttl`.
pub struct CoinGeckoPriceSource {
    client: reqwest::Client,
    api_url: String,
    /// token address -> CoinGecko coin id
    ids: HashMap<Network, HashMap<Address, String>>,
    limiter: Arc<DefaultDirectRateLimiter>,
    cache: DashMap<Network, (Instant, HashMap<Address, Decimal>)>,
    cache_ttl: Duration,
}

impl CoinGeckoPriceSource {
    pub fn new(
        settings: &CoinGeckoSettings,
        ids: HashMap<Network, HashMap<Address, String>>,
        cache_ttl: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;
        let per_minute = NonZeroU32::new(settings.requests_per_minute)
            .ok_or_else(|| anyhow::anyhow!("coingecko requests_per_minute must be positive"))?;

        Ok(Self {
            client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            ids,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            cache: DashMap::new(),
            cache_ttl,
        })
    }

    async fn fetch(&self, network: Network, ids: &HashMap<Address, String>) -> Result<HashMap<Address, Decimal>> {
        // Some tokens share an id (bridged and native versions of one asset)
        let unique_ids: BTreeSet<&str> = ids.values().map(String::as_str).collect();
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.api_url,
            unique_ids.into_iter().collect::<Vec<_>>().join(",")
        );

        self.limiter.until_ready().await;
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                anyhow::bail!("CoinGecko rate limited (429)");
            }
            anyhow::bail!("CoinGecko HTTP error: {}", response.status());
        }
        let body: CoinGeckoPriceResponse = response.json().await?;

        let prices = map_prices(ids, &body);
        debug!(
            "CoinGecko returned {} of {} price(s) on {}",
            prices.len(),
            ids.len(),
            network
        );
        Ok(prices)
    }
}

fn map_prices(
    ids: &HashMap<Address, String>,
    body: &CoinGeckoPriceResponse,
) -> HashMap<Address, Decimal> {
    let mut prices = HashMap::with_capacity(ids.len());
    for (address, coin_id) in ids {
        match body.get(coin_id).and_then(|p| p.usd) {
            Some(price) if price > Decimal::ZERO => {
                prices.insert(*address, price);
            }
            Some(price) => warn!("CoinGecko price {} for {} rejected", price, coin_id),
            None => {}
        }
    }
    prices
}

#[async_trait]
impl TokenPriceSource for CoinGeckoPriceSource {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn token_prices(&self, network: Network) -> Result<HashMap<Address, Decimal>> {
        let Some(ids) = self.ids.get(&network).filter(|ids| !ids.is_empty()) else {
            return Ok(HashMap::new());
        };
        if let Some(entry) = self.cache.get(&network) {
            let (fetched_at, prices) = entry.value();
            if fetched_at.elapsed() < self.cache_ttl {
                return Ok(prices.clone());
            }
        }

        let prices = self.fetch(network, ids).await?;
        self.cache.insert(network, (Instant::now(), prices.clone()));
        Ok(prices)
    }
}
