use crate::network::Network;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Typed value shown in a label or stat line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum DisplayItem {
    Dollar(Decimal),
    Pct(Decimal),
    Number(Decimal),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsItem {
    pub label: String,
    pub value: DisplayItem,
}

/// UI-facing description of a position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayProps {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_label: Option<DisplayItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tertiary_label: Option<DisplayItem>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub stats_items: Vec<StatsItem>,
}

/// Summary line attached to a product or to a whole balance response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataItemWithLabel {
    pub label: String,
    pub value: DisplayItem,
}

impl MetadataItemWithLabel {
    pub fn dollar(label: impl Into<String>, value: Decimal) -> Self {
        Self {
            label: label.into(),
            value: build_dollar_display_item(value),
        }
    }

    pub fn pct(label: impl Into<String>, value: Decimal) -> Self {
        Self {
            label: label.into(),
            value: build_percentage_display_item(value),
        }
    }
}

pub fn build_dollar_display_item(value: Decimal) -> DisplayItem {
    DisplayItem::Dollar(value.normalize())
}

pub fn build_percentage_display_item(value: Decimal) -> DisplayItem {
    DisplayItem::Pct(value.normalize())
}

const TOKEN_IMAGE_BASE_URL: &str = "https://storage.googleapis.com/zapper-fi-assets/tokens";

/// Image URL of a token, keyed by network id and lower-case address.
pub fn token_image_url(network: Network, address: &str) -> String {
    format!(
        "{}/{}/{}.png",
        TOKEN_IMAGE_BASE_URL,
        network.as_str(),
        address.to_lowercase()
    )
}
