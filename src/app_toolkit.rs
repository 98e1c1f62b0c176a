//! # App Toolkit
//!
//! The capability set a protocol integration is given: network handles, contract bindings,
//! batch collectors, base token prices and the positions other groups have produced.
//! Integrations hold an `Arc<dyn AppToolkit>` and nothing else, so they can be driven by
//! the real [`Toolkit`] or by a test double.

use crate::coingecko_price_source::CoinGeckoPriceSource;
use crate::contract_factory::{AggregatorBook, ContractFactory};
use crate::errors::SdkError;
use crate::metrics;
use crate::multicall::Multicall;
use crate::network::Network;
use crate::network_provider::{NetworkProviderRegistry, ReadProvider};
use crate::position_fetcher::AppGroupsDefinition;
use crate::position_service::PositionService;
use crate::price_feeds::{ChainlinkPriceSource, FallbackPriceSource, StaticPriceSource, TokenPriceSource};
use crate::settings::Settings;
use crate::token_service::{TokenMetadata, TokenService};
use crate::types::position::{AppTokenPosition, ContractPosition};
use async_trait::async_trait;
use ethers::types::Address;
use log::info;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait AppToolkit: Send + Sync {
    fn network_provider(&self, network: Network) -> Result<Arc<ReadProvider>, SdkError>;

    fn contracts(&self) -> &ContractFactory;

    /// A fresh batch collector for `network`. Each call returns an independent collector;
    /// callers keep one per pipeline invocation.
    fn multicall(&self, network: Network) -> Result<Multicall, SdkError>;

    async fn base_token_prices(&self, network: Network) -> Result<Arc<HashMap<Address, Decimal>>, SdkError>;

    async fn base_token_price(&self, network: Network, address: Address) -> Result<Decimal, SdkError>;

    fn app_token_positions(&self, definitions: &[AppGroupsDefinition]) -> Vec<AppTokenPosition<Value>>;

    fn app_contract_positions(&self, definitions: &[AppGroupsDefinition]) -> Vec<ContractPosition<Value>>;

    async fn token_metadata(
        &self,
        multicall: &Multicall,
        tokens: &[Address],
    ) -> Vec<Result<TokenMetadata, SdkError>>;
}

/// Concrete [`AppToolkit`] wiring.
pub struct Toolkit {
    providers: Arc<NetworkProviderRegistry>,
    contracts: ContractFactory,
    aggregators: AggregatorBook,
    tokens: Arc<TokenService>,
    positions: Arc<PositionService>,
    batch_size: usize,
}

impl Toolkit {
    pub fn new(
        providers: Arc<NetworkProviderRegistry>,
        aggregators: AggregatorBook,
        tokens: Arc<TokenService>,
        positions: Arc<PositionService>,
        batch_size: usize,
    ) -> Self {
        Self {
            contracts: ContractFactory::new(Arc::clone(&providers)),
            providers,
            aggregators,
            tokens,
            positions,
            batch_size,
        }
    }

    /// Builds the provider registry, aggregator book, price sources and services described
    /// by `settings`.
    ///
    /// Price sources are consulted in order: static prices, Chainlink feeds, then CoinGecko
    /// when enabled.
    pub fn from_settings(settings: &Settings) -> Result<Self, SdkError> {
        metrics::describe_metrics();
        let providers = Arc::new(NetworkProviderRegistry::new(settings.endpoints()?));
        let aggregators = AggregatorBook::from_settings(settings)?;
        let batch_size = settings.multicall.max_batch_size;

        let mut sources: Vec<Arc<dyn TokenPriceSource>> = vec![
            Arc::new(StaticPriceSource::new(settings.static_prices()?)),
            Arc::new(ChainlinkPriceSource::new(
                Arc::clone(&providers),
                aggregators.clone(),
                batch_size,
                settings.chainlink_feeds()?,
            )),
        ];
        if settings.prices.coingecko.enabled {
            let coingecko = CoinGeckoPriceSource::new(
                &settings.prices.coingecko,
                settings.coingecko_ids()?,
                settings.price_cache_ttl(),
            )
            .map_err(|e| SdkError::Config(format!("{:#}", e)))?;
            sources.push(Arc::new(coingecko));
        }
        info!(
            "Toolkit configured with {} price source(s) for {} network(s)",
            sources.len(),
            providers.networks().len()
        );

        let positions = Arc::new(PositionService::new(settings.pipeline.clone()));
        let tokens = Arc::new(TokenService::new(
            Arc::new(FallbackPriceSource::new(sources)),
            Arc::clone(&positions),
            settings.price_cache_ttl(),
        ));
        Ok(Self::new(providers, aggregators, tokens, positions, batch_size))
    }

    pub fn providers(&self) -> &Arc<NetworkProviderRegistry> {
        &self.providers
    }

    pub fn positions(&self) -> &Arc<PositionService> {
        &self.positions
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }
}

#[async_trait]
impl AppToolkit for Toolkit {
    fn network_provider(&self, network: Network) -> Result<Arc<ReadProvider>, SdkError> {
        self.providers.get_provider(network)
    }

    fn contracts(&self) -> &ContractFactory {
        &self.contracts
    }

    fn multicall(&self, network: Network) -> Result<Multicall, SdkError> {
        let aggregator = self.aggregators.aggregator_address(network)?;
        let transport = self.providers.transport(network)?;
        Ok(Multicall::new(network, transport, aggregator, self.batch_size))
    }

    async fn base_token_prices(&self, network: Network) -> Result<Arc<HashMap<Address, Decimal>>, SdkError> {
        self.tokens.get_token_prices(network).await
    }

    async fn base_token_price(&self, network: Network, address: Address) -> Result<Decimal, SdkError> {
        self.tokens.get_token_price(network, address).await
    }

    fn app_token_positions(&self, definitions: &[AppGroupsDefinition]) -> Vec<AppTokenPosition<Value>> {
        self.positions.get_app_token_positions(definitions)
    }

    fn app_contract_positions(&self, definitions: &[AppGroupsDefinition]) -> Vec<ContractPosition<Value>> {
        self.positions.get_app_contract_positions(definitions)
    }

    async fn token_metadata(
        &self,
        multicall: &Multicall,
        tokens: &[Address],
    ) -> Vec<Result<TokenMetadata, SdkError>> {
        self.tokens.token_metadata(multicall, tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toolkit_builds_from_settings_without_network_access() {
        let settings = Settings::from_toml_str(
            r#"
            [networks.optimism]
            rpc_url = "http://127.0.0.1:8545"

            [multicall]
            max_batch_size = 50
            "#,
        )
        .unwrap();
        let toolkit = Toolkit::from_settings(&settings).unwrap();

        let first = toolkit.multicall(Network::Optimism).unwrap();
        let second = toolkit.multicall(Network::Optimism).unwrap();
        assert_eq!(first.batch_size(), 50);
        assert_eq!(first.pending(), 0);
        assert_eq!(second.pending(), 0);
        assert!(matches!(
            toolkit.multicall(Network::Polygon),
            Err(SdkError::UnsupportedNetwork { .. })
        ));
    }
}
