use async_trait::async_trait;
use ethers::types::{Address, U256};
use indexmap::IndexSet;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::app_toolkit::AppToolkit;
use crate::contract_factory::ContractDescriptor;
use crate::errors::{PositionError, SdkError};
use crate::multicall::Deferred;
use crate::network::Network;
use crate::position_fetcher::{AppGroupsDefinition, BalanceFetcher, PositionFetcher, PositionPresenter};
use crate::presentation::{group_into_products, lending_meta, present_balances, LendingTotals, TokenBalanceResponse};
use crate::types::conversions::{address_to_string, parse_address};
use crate::types::display::{token_image_url, DisplayProps, MetadataItemWithLabel};
use crate::types::position::{ContractPosition, ContractPositionBalance, MetaType, PositionBalance, TokenRef};

pub const MORPHO_APP_ID: &str = "morpho";
pub const MORPHO_COMPOUND_GROUP_ID: &str = "morpho-compound";
pub const MORPHO_COMPOUND_PRODUCT_LABEL: &str = "Morpho Compound";

/// Morpho-Compound lens on Ethereum.
pub const MORPHO_COMPOUND_LENS_ADDRESS: &str = "0x930f1b46e1d081ec1524efd95752be3ece51ef67";

/// WETH on Ethereum; cETH has no `underlying()`.
pub const WRAPPED_NATIVE_ADDRESS: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MorphoCompoundContractPositionDataProps {
    /// The Compound cToken the Morpho market matches against.
    pub market_address: String,
}

#[derive(Debug, Clone)]
pub struct MorphoCompoundParams {
    pub network: Network,
    pub lens_address: String,
    pub wrapped_native_address: String,
}

impl Default for MorphoCompoundParams {
    fn default() -> Self {
        Self {
            network: Network::Ethereum,
            lens_address: MORPHO_COMPOUND_LENS_ADDRESS.to_string(),
            wrapped_native_address: WRAPPED_NATIVE_ADDRESS.to_string(),
        }
    }
}

/// One contract position per Morpho-Compound market, with the market's underlying token as
/// both the supplied and the borrowed token.
pub struct MorphoCompoundContractPositionFetcher {
    toolkit: Arc<dyn AppToolkit>,
    params: MorphoCompoundParams,
}

impl MorphoCompoundContractPositionFetcher {
    pub fn new(toolkit: Arc<dyn AppToolkit>, params: MorphoCompoundParams) -> Self {
        Self { toolkit, params }
    }
}

#[async_trait]
impl PositionFetcher for MorphoCompoundContractPositionFetcher {
    type Position = ContractPosition<MorphoCompoundContractPositionDataProps>;

    fn app_id(&self) -> &str {
        MORPHO_APP_ID
    }

    fn group_id(&self) -> &str {
        MORPHO_COMPOUND_GROUP_ID
    }

    fn network(&self) -> Network {
        self.params.network
    }

    async fn fetch(&self) -> Result<Vec<Result<Self::Position, PositionError>>, SdkError> {
        let network = self.params.network;
        let contracts = self.toolkit.contracts();
        let multicall = self.toolkit.multicall(network)?;
        let wrapped_native = parse_address(network, &self.params.wrapped_native_address)?;

        let lens = contracts.morpho_compound_lens(&ContractDescriptor::new(
            network,
            self.params.lens_address.as_str(),
        ))?;
        let markets = multicall.wrap(&lens).call(|l| l.get_all_markets()).await?;
        debug!("Morpho-Compound lists {} market(s) on {}", markets.len(), network);

        let mut underlying_reads: Vec<(Address, Deferred<Address>)> = Vec::with_capacity(markets.len());
        for market in &markets {
            let ctoken = contracts.compound_ctoken(network, *market)?;
            underlying_reads.push((*market, multicall.wrap(&ctoken).call(|c| c.underlying())));
        }
        let mut underlyings = Vec::with_capacity(underlying_reads.len());
        for (market, underlying) in underlying_reads {
            let underlying = match underlying.await {
                Ok(underlying) => Ok(underlying),
                // cETH reverts on `underlying()`.
                Err(e) if e.is_revert() => Ok(wrapped_native),
                Err(e @ SdkError::Decode { .. }) => Err(e),
                Err(e) => return Err(e),
            };
            underlyings.push((market, underlying));
        }

        let unique: IndexSet<Address> = underlyings
            .iter()
            .filter_map(|(_, u)| u.as_ref().ok().copied())
            .collect();
        let unique: Vec<Address> = unique.into_iter().collect();
        let metadata = self.toolkit.token_metadata(&multicall, &unique).await;
        let metadata: std::collections::HashMap<Address, _> = unique.into_iter().zip(metadata).collect();

        let mut outcomes = Vec::with_capacity(underlyings.len());
        for (market, underlying) in underlyings {
            let market_address = address_to_string(market);
            let underlying = match underlying {
                Ok(underlying) => underlying,
                Err(e) => {
                    outcomes.push(Err(PositionError::new(market_address, e)));
                    continue;
                }
            };
            let outcome = match metadata.get(&underlying) {
                Some(Ok(meta)) => self
                    .toolkit
                    .base_token_price(network, underlying)
                    .await
                    .map(|price| {
                        let token = TokenRef {
                            network,
                            address: address_to_string(underlying),
                            symbol: meta.symbol.clone(),
                            decimals: meta.decimals,
                            price,
                            meta_type: None,
                        };
                        ContractPosition {
                            network,
                            app_id: MORPHO_APP_ID.to_string(),
                            group_id: MORPHO_COMPOUND_GROUP_ID.to_string(),
                            address: market_address.clone(),
                            tokens: vec![
                                token.clone().with_meta_type(MetaType::Supplied),
                                token.clone().with_meta_type(MetaType::Borrowed),
                            ],
                            data_props: MorphoCompoundContractPositionDataProps {
                                market_address: market_address.clone(),
                            },
                            display_props: DisplayProps {
                                label: meta.symbol.clone(),
                                images: vec![token_image_url(network, &token.address)],
                                ..DisplayProps::default()
                            },
                        }
                    }),
                Some(Err(e)) => Err(e.clone()),
                None => Err(SdkError::Decode {
                    target: address_to_string(underlying),
                    function: "symbol".to_string(),
                    reason: "metadata missing".to_string(),
                }),
            };
            outcomes.push(outcome.map_err(|e| PositionError::new(market_address, e)));
        }
        Ok(outcomes)
    }
}

/// Summary lines of the "Morpho Compound" product, from the lens' account totals.
pub struct MorphoPositionPresenter {
    toolkit: Arc<dyn AppToolkit>,
    params: MorphoCompoundParams,
}

impl MorphoPositionPresenter {
    pub fn new(toolkit: Arc<dyn AppToolkit>, params: MorphoCompoundParams) -> Self {
        Self { toolkit, params }
    }
}

#[async_trait]
impl PositionPresenter for MorphoPositionPresenter {
    fn app_id(&self) -> &str {
        MORPHO_APP_ID
    }

    fn network(&self) -> Network {
        self.params.network
    }

    async fn product_meta(
        &self,
        label: &str,
        address: Address,
        balances: &[PositionBalance],
    ) -> Result<Vec<MetadataItemWithLabel>, SdkError> {
        if label != MORPHO_COMPOUND_PRODUCT_LABEL {
            return Ok(Vec::new());
        }
        let network = self.params.network;

        let mut markets = IndexSet::new();
        for balance in balances {
            if let PositionBalance::ContractPosition(b) = balance {
                let market = b
                    .position
                    .data_props
                    .get("marketAddress")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&b.position.address);
                markets.insert(parse_address(network, market)?);
            }
        }

        let lens = self.toolkit.contracts().morpho_compound_lens(&ContractDescriptor::new(
            network,
            self.params.lens_address.as_str(),
        ))?;
        let multicall = self.toolkit.multicall(network)?;
        let markets: Vec<Address> = markets.into_iter().collect();
        let (collateral_value, debt_value, max_debt_value) = multicall
            .wrap(&lens)
            .call(|l| l.get_user_balance_states(address, markets))
            .await?;

        let totals = LendingTotals::from_raw(collateral_value, debt_value, max_debt_value)?;
        Ok(lending_meta(&totals))
    }
}

/// A wallet's supplied and borrowed balances across the registered Morpho-Compound markets.
pub struct MorphoBalanceFetcher {
    toolkit: Arc<dyn AppToolkit>,
    params: MorphoCompoundParams,
    presenter: MorphoPositionPresenter,
}

impl MorphoBalanceFetcher {
    pub fn new(toolkit: Arc<dyn AppToolkit>, params: MorphoCompoundParams) -> Self {
        Self {
            presenter: MorphoPositionPresenter::new(Arc::clone(&toolkit), params.clone()),
            toolkit,
            params,
        }
    }
}

#[async_trait]
impl BalanceFetcher for MorphoBalanceFetcher {
    fn app_id(&self) -> &str {
        MORPHO_APP_ID
    }

    fn network(&self) -> Network {
        self.params.network
    }

    async fn get_balances(&self, address: Address) -> Result<TokenBalanceResponse, SdkError> {
        let network = self.params.network;
        let markets = self.toolkit.app_contract_positions(&[
            AppGroupsDefinition::new(MORPHO_APP_ID, network).with_group(MORPHO_COMPOUND_GROUP_ID)
        ]);

        let lens = self.toolkit.contracts().morpho_compound_lens(&ContractDescriptor::new(
            network,
            self.params.lens_address.as_str(),
        ))?;
        let multicall = self.toolkit.multicall(network)?;
        let lens = multicall.wrap(&lens);

        let mut notes = Vec::new();
        let mut reads = Vec::with_capacity(markets.len());
        for market in markets {
            let pool_token = match parse_address(network, &market.address) {
                Ok(pool_token) => pool_token,
                Err(e) => {
                    warn!("Skipping Morpho market {}: {}", market.address, e);
                    notes.push(format!("{}: {}", market.address, e));
                    continue;
                }
            };
            let supplied = lens.call(|l| l.get_current_supply_balance_in_of(pool_token, address));
            let borrowed = lens.call(|l| l.get_current_borrow_balance_in_of(pool_token, address));
            reads.push((market, supplied, borrowed));
        }

        let mut balances = Vec::new();
        for (market, supplied, borrowed) in reads {
            match market_balance(&market, supplied, borrowed).await {
                Ok(Some(balance)) => balances.push(PositionBalance::ContractPosition(balance)),
                Ok(None) => {}
                Err(e) => {
                    warn!("Morpho balance of {:?} in {} unavailable: {}", address, market.address, e);
                    notes.push(format!("{}: {}", market.address, e));
                }
            }
        }

        let mut products = group_into_products(balances, |_| MORPHO_COMPOUND_PRODUCT_LABEL.to_string());
        for product in &mut products {
            match self.presenter.product_meta(&product.label, address, &product.assets).await {
                Ok(meta) => product.meta = meta,
                Err(e) => {
                    warn!("Morpho product meta for {:?} unavailable: {}", address, e);
                    notes.push(format!("{}: {}", product.label, e));
                }
            }
        }

        let mut response = present_balances(products);
        response.error = (!notes.is_empty()).then(|| notes.join("; "));
        Ok(response)
    }
}

type LensBalance = (U256, U256, U256);

/// `None` when the account holds nothing in the market.
async fn market_balance(
    market: &ContractPosition<Value>,
    supplied: Deferred<LensBalance>,
    borrowed: Deferred<LensBalance>,
) -> Result<Option<ContractPositionBalance>, SdkError> {
    let (_, _, supplied) = supplied.await?;
    let (_, _, borrowed) = borrowed.await?;
    if supplied.is_zero() && borrowed.is_zero() {
        return Ok(None);
    }
    market.drill_balances(&[supplied, borrowed]).map(Some)
}
