//! Uniform position records.
//!
//! Protocol adapters produce these; the valuation pipeline validates and registers them,
//! and the presentation layer groups their balances into products. The envelope is fixed;
//! protocol-specific facts ride in the `data_props` payload, typed by the adapter and
//! erased to `serde_json::Value` when positions from different protocols are mixed.

use crate::errors::SdkError;
use crate::network::Network;
use crate::normalization::{normalize_amount, usd_value};
use crate::types::display::DisplayProps;
use ethers::types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound accepted for token decimals.
pub const MAX_TOKEN_DECIMALS: u8 = 36;

/// Role of an underlying token inside a contract position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaType {
    Supplied,
    Borrowed,
    Claimable,
    Vesting,
    Locked,
}

/// Reference to an underlying token with the price it was valued at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRef {
    pub network: Network,
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_type: Option<MetaType>,
}

impl TokenRef {
    pub fn with_meta_type(mut self, meta_type: MetaType) -> Self {
        self.meta_type = Some(meta_type);
        self
    }

    /// Balance of this token for a raw amount. Borrowed balances count negatively.
    pub fn drill(&self, raw: U256) -> Result<TokenBalance, SdkError> {
        let amount = normalize_amount(raw, self.decimals)?;
        let value = usd_value(amount, self.price)?;
        let (balance, balance_usd) = if self.meta_type == Some(MetaType::Borrowed) {
            (-amount, -value)
        } else {
            (amount, value)
        };
        Ok(TokenBalance {
            token: self.clone(),
            balance,
            balance_raw: raw.to_string(),
            balance_usd,
        })
    }
}

/// A position that is itself a tradable token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTokenPosition<T = Value> {
    pub network: Network,
    pub app_id: String,
    pub group_id: String,
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    pub supply: Decimal,
    pub price: Decimal,
    pub price_per_share: Vec<Decimal>,
    pub tokens: Vec<TokenRef>,
    pub data_props: T,
    pub display_props: DisplayProps,
}

impl<T> AppTokenPosition<T> {
    pub fn erase(self) -> Result<AppTokenPosition<Value>, SdkError>
    where
        T: Serialize,
    {
        let data_props = erase_data_props(&self.address, &self.data_props)?;
        Ok(AppTokenPosition {
            network: self.network,
            app_id: self.app_id,
            group_id: self.group_id,
            address: self.address,
            symbol: self.symbol,
            decimals: self.decimals,
            supply: self.supply,
            price: self.price,
            price_per_share: self.price_per_share,
            tokens: self.tokens,
            data_props,
            display_props: self.display_props,
        })
    }

    pub fn drill_balance(&self, raw: U256) -> Result<AppTokenPositionBalance<T>, SdkError>
    where
        T: Clone,
    {
        let balance = normalize_amount(raw, self.decimals)?;
        let balance_usd = usd_value(balance, self.price)?;
        Ok(AppTokenPositionBalance {
            position: self.clone(),
            balance,
            balance_raw: raw.to_string(),
            balance_usd,
        })
    }
}

/// A position anchored to a non-tokenized contract (lending market, farm, vault account).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractPosition<T = Value> {
    pub network: Network,
    pub app_id: String,
    pub group_id: String,
    pub address: String,
    pub tokens: Vec<TokenRef>,
    pub data_props: T,
    pub display_props: DisplayProps,
}

impl<T> ContractPosition<T> {
    pub fn erase(self) -> Result<ContractPosition<Value>, SdkError>
    where
        T: Serialize,
    {
        let data_props = erase_data_props(&self.address, &self.data_props)?;
        Ok(ContractPosition {
            network: self.network,
            app_id: self.app_id,
            group_id: self.group_id,
            address: self.address,
            tokens: self.tokens,
            data_props,
            display_props: self.display_props,
        })
    }

    /// Balances for raw amounts given in the same order as `tokens`.
    pub fn drill_balances(&self, raws: &[U256]) -> Result<ContractPositionBalance<T>, SdkError>
    where
        T: Clone,
    {
        if raws.len() != self.tokens.len() {
            return Err(SdkError::InvalidPosition {
                address: self.address.clone(),
                reason: format!(
                    "{} raw balances for {} tokens",
                    raws.len(),
                    self.tokens.len()
                ),
            });
        }
        let tokens = self
            .tokens
            .iter()
            .zip(raws)
            .map(|(token, raw)| token.drill(*raw))
            .collect::<Result<Vec<_>, _>>()?;
        let balance_usd = tokens
            .iter()
            .try_fold(Decimal::ZERO, |acc, t| acc.checked_add(t.balance_usd))
            .ok_or(crate::types::conversions::ConversionError::Overflow)?;
        Ok(ContractPositionBalance {
            position: self.clone(),
            tokens,
            balance_usd,
        })
    }
}

/// Tagged union over the two position shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Position<T = Value> {
    AppToken(AppTokenPosition<T>),
    ContractPosition(ContractPosition<T>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub token: TokenRef,
    pub balance: Decimal,
    pub balance_raw: String,
    pub balance_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTokenPositionBalance<T = Value> {
    pub position: AppTokenPosition<T>,
    pub balance: Decimal,
    pub balance_raw: String,
    pub balance_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractPositionBalance<T = Value> {
    pub position: ContractPosition<T>,
    pub tokens: Vec<TokenBalance>,
    pub balance_usd: Decimal,
}

impl<T> ContractPositionBalance<T> {
    pub fn erase(self) -> Result<ContractPositionBalance<Value>, SdkError>
    where
        T: Serialize,
    {
        Ok(ContractPositionBalance {
            position: self.position.erase()?,
            tokens: self.tokens,
            balance_usd: self.balance_usd,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PositionBalance<T = Value> {
    AppToken(AppTokenPositionBalance<T>),
    ContractPosition(ContractPositionBalance<T>),
}

impl<T> PositionBalance<T> {
    pub fn balance_usd(&self) -> Decimal {
        match self {
            PositionBalance::AppToken(b) => b.balance_usd,
            PositionBalance::ContractPosition(b) => b.balance_usd,
        }
    }

    pub fn app_id(&self) -> &str {
        match self {
            PositionBalance::AppToken(b) => &b.position.app_id,
            PositionBalance::ContractPosition(b) => &b.position.app_id,
        }
    }

    pub fn group_id(&self) -> &str {
        match self {
            PositionBalance::AppToken(b) => &b.position.group_id,
            PositionBalance::ContractPosition(b) => &b.position.group_id,
        }
    }

    pub fn network(&self) -> Network {
        match self {
            PositionBalance::AppToken(b) => b.position.network,
            PositionBalance::ContractPosition(b) => b.position.network,
        }
    }

    /// Individual token balances, for asset/debt totals.
    pub fn token_balances_usd(&self) -> Vec<Decimal> {
        match self {
            PositionBalance::AppToken(b) => vec![b.balance_usd],
            PositionBalance::ContractPosition(b) => {
                b.tokens.iter().map(|t| t.balance_usd).collect()
            }
        }
    }
}

/// Common behaviour the valuation pipeline needs from any position record.
pub trait PositionRecord {
    fn address(&self) -> &str;

    /// Checks the record's numeric invariants.
    fn validate(&self) -> Result<(), SdkError>;
}

impl<T> PositionRecord for AppTokenPosition<T> {
    fn address(&self) -> &str {
        &self.address
    }

    fn validate(&self) -> Result<(), SdkError> {
        let invalid = |reason: String| SdkError::InvalidPosition {
            address: self.address.clone(),
            reason,
        };
        if self.price < Decimal::ZERO {
            return Err(invalid(format!("negative price {}", self.price)));
        }
        if self.supply < Decimal::ZERO {
            return Err(invalid(format!("negative supply {}", self.supply)));
        }
        if self.decimals > MAX_TOKEN_DECIMALS {
            return Err(invalid(format!("decimals {} out of range", self.decimals)));
        }
        if self.price_per_share.iter().any(|pps| *pps < Decimal::ZERO) {
            return Err(invalid("negative price per share".to_string()));
        }
        validate_tokens(&self.address, &self.tokens)
    }
}

impl<T> PositionRecord for ContractPosition<T> {
    fn address(&self) -> &str {
        &self.address
    }

    fn validate(&self) -> Result<(), SdkError> {
        validate_tokens(&self.address, &self.tokens)
    }
}

fn validate_tokens(address: &str, tokens: &[TokenRef]) -> Result<(), SdkError> {
    for token in tokens {
        if token.price < Decimal::ZERO || token.decimals > MAX_TOKEN_DECIMALS {
            return Err(SdkError::InvalidPosition {
                address: address.to_string(),
                reason: format!("underlying {} has invalid price or decimals", token.symbol),
            });
        }
    }
    Ok(())
}

fn erase_data_props<T: Serialize>(address: &str, data_props: &T) -> Result<Value, SdkError> {
    serde_json::to_value(data_props).map_err(|e| SdkError::InvalidPosition {
        address: address.to_string(),
        reason: format!("data props not serializable: {e}"),
    })
}
