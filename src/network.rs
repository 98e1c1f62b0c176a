// src/network.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical blockchain identifier.
///
/// The set is fixed at compile time; every per-network table in the SDK (endpoints,
/// aggregator addresses, price tables) is keyed by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    Ethereum,
    Polygon,
    Optimism,
    Gnosis,
    BinanceSmartChain,
    Fantom,
    Avalanche,
    Arbitrum,
    Celo,
    Harmony,
    Moonriver,
}

impl Network {
    pub const ALL: [Network; 11] = [
        Network::Ethereum,
        Network::Polygon,
        Network::Optimism,
        Network::Gnosis,
        Network::BinanceSmartChain,
        Network::Fantom,
        Network::Avalanche,
        Network::Arbitrum,
        Network::Celo,
        Network::Harmony,
        Network::Moonriver,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Polygon => "polygon",
            Network::Optimism => "optimism",
            Network::Gnosis => "gnosis",
            Network::BinanceSmartChain => "binance-smart-chain",
            Network::Fantom => "fantom",
            Network::Avalanche => "avalanche",
            Network::Arbitrum => "arbitrum",
            Network::Celo => "celo",
            Network::Harmony => "harmony",
            Network::Moonriver => "moonriver",
        }
    }

    /// EIP-155 chain id.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Polygon => 137,
            Network::Optimism => 10,
            Network::Gnosis => 100,
            Network::BinanceSmartChain => 56,
            Network::Fantom => 250,
            Network::Avalanche => 43114,
            Network::Arbitrum => 42161,
            Network::Celo => 42220,
            Network::Harmony => 1_666_600_000,
            Network::Moonriver => 1285,
        }
    }

    /// Name used for environment variable overrides (`SDK_RPC_URL_<NAME>`).
    pub fn env_key(&self) -> String {
        self.as_str().replace('-', "_").to_uppercase()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network id: {0}")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Network::ALL
            .iter()
            .copied()
            .find(|network| network.as_str() == normalized)
            .ok_or_else(|| UnknownNetwork(s.to_string()))
    }
}
