use crate::errors::SdkError;
use crate::metrics;
use crate::multicall::{Deferred, Multicall};
use crate::network::Network;
use crate::position_service::PositionService;
use crate::price_feeds::TokenPriceSource;
use crate::types::conversions::address_to_string;
use dashmap::DashMap;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::{id, parse_bytes32_string};
use log::{debug, warn};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// ERC20 facts read from chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub network: Network,
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
}

/// Base token prices and token metadata.
///
/// Prices come from the configured [`TokenPriceSource`] and are cached per network for the
/// configured TTL. A token without a base price is priced from the app tokens the position
/// service has registered, if one matches.
pub struct TokenService {
    prices: Arc<dyn TokenPriceSource>,
    positions: Arc<PositionService>,
    price_cache: DashMap<Network, (Instant, Arc<HashMap<Address, Decimal>>)>,
    price_ttl: Duration,
    /// Symbol and decimals never change for a deployed token.
    metadata_cache: DashMap<(Network, Address), (String, u8)>,
}

impl TokenService {
    pub fn new(prices: Arc<dyn TokenPriceSource>, positions: Arc<PositionService>, price_ttl: Duration) -> Self {
        Self {
            prices,
            positions,
            price_cache: DashMap::new(),
            price_ttl,
            metadata_cache: DashMap::new(),
        }
    }

    pub async fn get_token_prices(&self, network: Network) -> Result<Arc<HashMap<Address, Decimal>>, SdkError> {
        if let Some(entry) = self.price_cache.get(&network) {
            let (fetched_at, prices) = entry.value();
            if fetched_at.elapsed() < self.price_ttl {
                return Ok(Arc::clone(prices));
            }
        }

        let prices = self
            .prices
            .token_prices(network)
            .await
            .map_err(|e| SdkError::PriceSource {
                network,
                cause: format!("{:#}", e),
            })?;
        debug!(
            "Loaded {} base price(s) on {} from {}",
            prices.len(),
            network,
            self.prices.name()
        );
        let prices = Arc::new(prices);
        self.price_cache
            .insert(network, (Instant::now(), Arc::clone(&prices)));
        Ok(prices)
    }

    /// USD price of a base token, else of a registered app token.
    pub async fn get_token_price(&self, network: Network, address: Address) -> Result<Decimal, SdkError> {
        if let Some(price) = self.get_token_prices(network).await?.get(&address) {
            return Ok(*price);
        }
        if let Some(app_token) = self.positions.find_app_token(network, address) {
            return Ok(app_token.price);
        }
        metrics::increment_price_lookup_miss(network.as_str());
        Err(SdkError::PriceUnavailable {
            network,
            address: address_to_string(address),
        })
    }

    /// Symbol, decimals and supply of `tokens`, read through `multicall`.
    ///
    /// Results are in input order; a token whose reads fail gets its own error.
    /// Tokens that return `bytes32` symbols are supported.
    pub async fn token_metadata(
        &self,
        multicall: &Multicall,
        tokens: &[Address],
    ) -> Vec<Result<TokenMetadata, SdkError>> {
        let network = multicall.network();
        let mut pending = Vec::with_capacity(tokens.len());
        for &token in tokens {
            let known = self.metadata_cache.get(&(network, token)).map(|e| e.value().clone());
            let descriptive = match known {
                Some(cached) => Descriptive::Cached(cached),
                None => Descriptive::Pending {
                    symbol: multicall.enqueue_raw(token, selector("symbol()"), "symbol", decode_symbol),
                    decimals: multicall.enqueue_raw(token, selector("decimals()"), "decimals", decode_decimals),
                },
            };
            let supply = multicall.enqueue_raw(token, selector("totalSupply()"), "totalSupply", decode_uint);
            pending.push((token, descriptive, supply));
        }

        let mut results = Vec::with_capacity(pending.len());
        for (token, descriptive, supply) in pending {
            let (symbol, decimals) = match descriptive {
                Descriptive::Cached(cached) => cached,
                Descriptive::Pending { symbol, decimals } => match (symbol.await, decimals.await) {
                    (Ok(symbol), Ok(decimals)) => {
                        self.metadata_cache
                            .insert((network, token), (symbol.clone(), decimals));
                        (symbol, decimals)
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        warn!("Metadata for {:?} on {} unavailable: {}", token, network, e);
                        results.push(Err(e));
                        continue;
                    }
                },
            };
            results.push(supply.await.map(|total_supply| TokenMetadata {
                network,
                address: token,
                symbol,
                decimals,
                total_supply,
            }));
        }
        results
    }
}

enum Descriptive {
    Cached((String, u8)),
    Pending {
        symbol: Deferred<String>,
        decimals: Deferred<u8>,
    },
}

fn selector(signature: &str) -> Bytes {
    Bytes::from(id(signature).to_vec())
}

fn decode_single(kind: ParamType, data: &[u8]) -> Result<Token, String> {
    ethers::abi::decode(&[kind], data)
        .map_err(|e| e.to_string())?
        .into_iter()
        .next()
        .ok_or_else(|| "empty return data".to_string())
}

/// `string` symbols, falling back to `bytes32` (MKR, SAI and other early tokens).
fn decode_symbol(data: &[u8]) -> Result<String, String> {
    if let Ok(Token::String(symbol)) = decode_single(ParamType::String, data) {
        return Ok(symbol);
    }
    let word: [u8; 32] = data
        .get(..32)
        .and_then(|w| w.try_into().ok())
        .ok_or_else(|| format!("symbol return data of {} bytes", data.len()))?;
    parse_bytes32_string(&word)
        .map(str::to_string)
        .map_err(|e| e.to_string())
}

fn decode_decimals(data: &[u8]) -> Result<u8, String> {
    let value = decode_uint(data)?;
    if value > U256::from(u8::MAX) {
        return Err(format!("decimals {} out of range", value));
    }
    Ok(value.low_u32() as u8)
}

fn decode_uint(data: &[u8]) -> Result<U256, String> {
    decode_single(ParamType::Uint(256), data)?
        .into_uint()
        .ok_or_else(|| "expected uint256".to_string())
}
