use async_trait::async_trait;
use ethers::types::{Address, U256};
use ethers::utils::{format_bytes32_string, parse_bytes32_string};
use futures::future::join_all;
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::app_toolkit::AppToolkit;
use crate::contract_factory::ContractDescriptor;
use crate::errors::{PositionError, SdkError};
use crate::multicall::Deferred;
use crate::network::Network;
use crate::normalization::{format_units_18, usd_value};
use crate::position_fetcher::PositionFetcher;
use crate::types::conversions::address_to_string;
use crate::types::display::{build_dollar_display_item, token_image_url, DisplayProps, StatsItem};
use crate::types::position::AppTokenPosition;

pub const SYNTHETIX_APP_ID: &str = "synthetix";
pub const SYNTH_GROUP_ID: &str = "synth";

/// Synths are 18-decimal tokens and rates are 18-decimal USD values.
const SYNTH_DECIMALS: u8 = 18;

/// Resolver key of the contract that reports every synth's rate.
const SYNTH_UTIL_NAME: &str = "SynthUtil";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthetixAppTokenDataProps {
    pub exchangeable: bool,
    pub liquidity: Decimal,
}

#[derive(Debug, Clone)]
pub struct SynthetixSynthTokenParams {
    pub network: Network,
    /// Synthetix `AddressResolver`
    pub resolver_address: String,
    pub exchangeable: bool,
}

/// Price, supply and liquidity of one synth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthValuation {
    pub price: Decimal,
    pub supply: Decimal,
    pub liquidity: Decimal,
}

/// `price = rate / 1e18`, `supply = totalSupply / 1e18`, `liquidity = supply * price`.
pub fn synth_valuation(rate_raw: U256, supply_raw: U256) -> Result<SynthValuation, SdkError> {
    let price = format_units_18(rate_raw)?;
    let supply = format_units_18(supply_raw)?;
    let liquidity = usd_value(supply, price)?;
    Ok(SynthValuation {
        price,
        supply,
        liquidity,
    })
}

/// Every synth registered with a Synthetix deployment, as app tokens.
///
/// Reads happen in four batch rounds: the `SynthUtil` address, all synth keys and rates,
/// the implementation of every synth, then proxy and supply of every synth.
pub struct SynthetixSynthTokenFetcher {
    toolkit: Arc<dyn AppToolkit>,
    params: SynthetixSynthTokenParams,
}

impl SynthetixSynthTokenFetcher {
    pub fn new(toolkit: Arc<dyn AppToolkit>, params: SynthetixSynthTokenParams) -> Self {
        Self { toolkit, params }
    }

    fn build_token(
        &self,
        symbol: String,
        proxy: Address,
        rate_raw: U256,
        supply_raw: U256,
    ) -> Result<AppTokenPosition<SynthetixAppTokenDataProps>, SdkError> {
        let network = self.params.network;
        let address = address_to_string(proxy);
        let SynthValuation {
            price,
            supply,
            liquidity,
        } = synth_valuation(rate_raw, supply_raw)?;

        Ok(AppTokenPosition {
            network,
            app_id: SYNTHETIX_APP_ID.to_string(),
            group_id: SYNTH_GROUP_ID.to_string(),
            symbol: symbol.clone(),
            decimals: SYNTH_DECIMALS,
            supply,
            price,
            price_per_share: vec![Decimal::ONE],
            tokens: Vec::new(),
            data_props: SynthetixAppTokenDataProps {
                exchangeable: self.params.exchangeable,
                liquidity,
            },
            display_props: DisplayProps {
                label: symbol,
                secondary_label: Some(build_dollar_display_item(price)),
                tertiary_label: None,
                images: vec![token_image_url(network, &address)],
                stats_items: vec![StatsItem {
                    label: "Liquidity".to_string(),
                    value: build_dollar_display_item(liquidity),
                }],
            },
            address,
        })
    }
}

#[async_trait]
impl PositionFetcher for SynthetixSynthTokenFetcher {
    type Position = AppTokenPosition<SynthetixAppTokenDataProps>;

    fn app_id(&self) -> &str {
        SYNTHETIX_APP_ID
    }

    fn group_id(&self) -> &str {
        SYNTH_GROUP_ID
    }

    fn network(&self) -> Network {
        self.params.network
    }

    async fn fetch(&self) -> Result<Vec<Result<Self::Position, PositionError>>, SdkError> {
        let network = self.params.network;
        let contracts = self.toolkit.contracts();
        let multicall = self.toolkit.multicall(network)?;

        let resolver = contracts.synthetix_address_resolver(&ContractDescriptor::new(
            network,
            self.params.resolver_address.as_str(),
        ))?;
        let resolver = multicall.wrap(&resolver);

        let synth_util_name = format_bytes32_string(SYNTH_UTIL_NAME).map_err(|e| SdkError::Decode {
            target: self.params.resolver_address.clone(),
            function: "getAddress".to_string(),
            reason: e.to_string(),
        })?;
        let synth_util_address = resolver.call(|r| r.get_address(synth_util_name)).await?;

        let summary = contracts.synthetix_summary_util(network, synth_util_address)?;
        let (keys, rates) = multicall.wrap(&summary).call(|s| s.synths_rates()).await?;
        if keys.len() != rates.len() {
            return Err(SdkError::Decode {
                target: address_to_string(synth_util_address),
                function: "synthsRates".to_string(),
                reason: format!("{} keys for {} rates", keys.len(), rates.len()),
            });
        }
        debug!("Synthetix on {} reports {} synth(s)", network, keys.len());

        let implementations: Vec<Deferred<Address>> = keys
            .iter()
            .map(|key| resolver.call(|r| r.get_synth(*key)))
            .collect();
        let implementations = join_all(implementations.into_iter().map(Deferred::resolve)).await;

        let mut pending = Vec::with_capacity(keys.len());
        for ((key, rate), implementation) in keys.iter().zip(rates).zip(implementations) {
            let symbol = synth_symbol(key);
            match implementation {
                Ok(implementation) => {
                    let synth = contracts.synthetix_network_token(network, implementation)?;
                    let synth = multicall.wrap(&synth);
                    let proxy = synth.call(|s| s.proxy());
                    let supply = synth.call(|s| s.total_supply());
                    pending.push(Ok((symbol, rate, proxy, supply)));
                }
                Err(e) => pending.push(Err(PositionError::new(symbol, e))),
            }
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for entry in pending {
            let (symbol, rate, proxy, supply) = match entry {
                Ok(entry) => entry,
                Err(note) => {
                    outcomes.push(Err(note));
                    continue;
                }
            };
            let token = match (proxy.await, supply.await) {
                (Ok(proxy), Ok(supply)) => self.build_token(symbol.clone(), proxy, rate, supply),
                (Err(e), _) | (_, Err(e)) => Err(e),
            };
            outcomes.push(token.map_err(|e| PositionError::new(symbol, e)));
        }
        Ok(outcomes)
    }
}

fn synth_symbol(key: &[u8; 32]) -> String {
    match parse_bytes32_string(key) {
        Ok(symbol) => symbol.to_string(),
        Err(_) => format!("0x{}", hex::encode(key)),
    }
}
