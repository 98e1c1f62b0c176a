// src/presentation.rs
//
// Balance presentation: groups position balances into labelled products and derives the
// summary lines shown with them. Everything here is pure; reads needed for a product's
// summary are done by the app's `PositionPresenter` before it calls into this module.

use crate::errors::SdkError;
use crate::normalization::format_units_18;
use crate::types::display::MetadataItemWithLabel;
use crate::types::position::PositionBalance;
use ethers::types::U256;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductItem {
    pub label: String,
    pub assets: Vec<PositionBalance>,
    pub meta: Vec<MetadataItemWithLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalanceResponse {
    pub products: Vec<ProductItem>,
    pub meta: Vec<MetadataItemWithLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `debt / max_debt`, or 0 when nothing can be borrowed.
pub fn utilization_rate(debt: Decimal, max_debt: Decimal) -> Decimal {
    if max_debt <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    debt.checked_div(max_debt).unwrap_or(Decimal::ZERO)
}

/// USD totals of a lending account, as 18-decimal fixed-point values from a lens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LendingTotals {
    pub collateral_value: Decimal,
    pub debt_value: Decimal,
    pub max_debt_value: Decimal,
}

impl LendingTotals {
    pub fn from_raw(collateral_value: U256, debt_value: U256, max_debt_value: U256) -> Result<Self, SdkError> {
        Ok(Self {
            collateral_value: format_units_18(collateral_value)?,
            debt_value: format_units_18(debt_value)?,
            max_debt_value: format_units_18(max_debt_value)?,
        })
    }

    pub fn utilization_rate(&self) -> Decimal {
        utilization_rate(self.debt_value, self.max_debt_value)
    }
}

/// Collateral (borrowing capacity), Total Supply, Debt and Utilization Rate lines.
pub fn lending_meta(totals: &LendingTotals) -> Vec<MetadataItemWithLabel> {
    vec![
        MetadataItemWithLabel::dollar("Collateral", totals.max_debt_value),
        MetadataItemWithLabel::dollar("Total Supply", totals.collateral_value),
        MetadataItemWithLabel::dollar("Debt", totals.debt_value),
        MetadataItemWithLabel::pct("Utilization Rate", totals.utilization_rate()),
    ]
}

/// Groups balances into products by label, in order of first appearance.
pub fn group_into_products<F>(balances: Vec<PositionBalance>, label_for: F) -> Vec<ProductItem>
where
    F: Fn(&PositionBalance) -> String,
{
    let mut grouped: IndexMap<String, Vec<PositionBalance>> = IndexMap::new();
    for balance in balances {
        grouped.entry(label_for(&balance)).or_default().push(balance);
    }
    grouped
        .into_iter()
        .map(|(label, assets)| ProductItem {
            label,
            assets,
            meta: Vec::new(),
        })
        .collect()
}

/// Total, Assets and Debt lines over every token balance of every product.
pub fn balance_totals_meta(products: &[ProductItem]) -> Vec<MetadataItemWithLabel> {
    let mut assets = Decimal::ZERO;
    let mut debt = Decimal::ZERO;
    for value in products
        .iter()
        .flat_map(|p| p.assets.iter())
        .flat_map(PositionBalance::token_balances_usd)
    {
        if value >= Decimal::ZERO {
            assets = assets.saturating_add(value);
        } else {
            debt = debt.saturating_add(value.abs());
        }
    }
    vec![
        MetadataItemWithLabel::dollar("Total", assets.saturating_sub(debt)),
        MetadataItemWithLabel::dollar("Assets", assets),
        MetadataItemWithLabel::dollar("Debt", debt),
    ]
}

pub fn present_balances(products: Vec<ProductItem>) -> TokenBalanceResponse {
    let meta = balance_totals_meta(&products);
    TokenBalanceResponse {
        products,
        meta,
        error: None,
    }
}
