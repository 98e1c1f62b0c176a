use crate::errors::SdkError;
use crate::network::Network;
use crate::types::conversions::parse_address;
use config::{Config, ConfigError, File, FileFormat};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Prefix of the per-network RPC endpoint override, e.g. `SDK_RPC_URL_OPTIMISM`.
pub const RPC_URL_ENV_PREFIX: &str = "SDK_RPC_URL_";

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkEndpoint {
    pub rpc_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Overrides the Multicall3 address for this network.
    #[serde(default)]
    pub multicall_address: Option<String>,
}

impl NetworkEndpoint {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            timeout_seconds: default_timeout_seconds(),
            multicall_address: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_timeout_seconds() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct MulticallSettings {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for MulticallSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_max_batch_size() -> usize {
    crate::multicall::DEFAULT_BATCH_SIZE
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    /// Re-runs of a position group after a batch execution failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

fn default_max_retries() -> usize {
    2
}
fn default_retry_base_delay_ms() -> u64 {
    200
}
fn default_retry_max_delay_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoinGeckoSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_coingecko_api_url")]
    pub api_url: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_coingecko_timeout_ms")]
    pub timeout_ms: u64,
    /// network id -> token address -> CoinGecko coin id
    #[serde(default)]
    pub ids: HashMap<String, HashMap<String, String>>,
}

impl Default for CoinGeckoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_coingecko_api_url(),
            requests_per_minute: default_requests_per_minute(),
            timeout_ms: default_coingecko_timeout_ms(),
            ids: HashMap::new(),
        }
    }
}

fn default_coingecko_api_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}
fn default_requests_per_minute() -> u32 {
    30 // free tier
}
fn default_coingecko_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PriceSettings {
    #[serde(default = "default_price_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// network id -> token address -> USD price
    #[serde(default)]
    pub static_usd: HashMap<String, HashMap<String, Decimal>>,
    /// network id -> token address -> Chainlink USD aggregator
    #[serde(default)]
    pub chainlink: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub coingecko: CoinGeckoSettings,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_price_cache_ttl_seconds(),
            static_usd: HashMap::new(),
            chainlink: HashMap::new(),
            coingecko: CoinGeckoSettings::default(),
        }
    }
}

fn default_price_cache_ttl_seconds() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Keyed by network id (`ethereum`, `binance-smart-chain`, ...).
    #[serde(default)]
    pub networks: HashMap<String, NetworkEndpoint>,
    #[serde(default)]
    pub multicall: MulticallSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub prices: PriceSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Loads `Config.toml` from the working directory if present, after `.env` has been
    /// read into the environment, then applies environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let s = Config::builder()
            .add_source(File::with_name("Config.toml").required(false))
            .build()?;
        Self::finish(s)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;
        Self::finish(s)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Self::finish(s)
    }

    fn finish(config: Config) -> Result<Self, ConfigError> {
        let mut settings: Self = config.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// `SDK_RPC_URL_<NETWORK>` replaces the configured RPC URL of that network, or adds the
    /// network with default options when it is not configured.
    fn apply_env_overrides(&mut self) {
        for network in Network::ALL {
            let Ok(raw_url) = env::var(format!("{}{}", RPC_URL_ENV_PREFIX, network.env_key()))
            else {
                continue;
            };
            let url = raw_url.trim();
            if url.is_empty() {
                continue;
            }

            let existing = self
                .networks
                .iter_mut()
                .find(|(id, _)| Network::from_str(id).ok() == Some(network));
            match existing {
                Some((_, endpoint)) => endpoint.rpc_url = url.to_string(),
                None => {
                    self.networks
                        .insert(network.as_str().to_string(), NetworkEndpoint::new(url));
                }
            }
        }
    }

    /// Validated endpoint table.
    pub fn endpoints(&self) -> Result<HashMap<Network, NetworkEndpoint>, SdkError> {
        let mut endpoints = HashMap::with_capacity(self.networks.len());
        for (id, endpoint) in &self.networks {
            let network = parse_network_id(id)?;
            let url = url::Url::parse(&endpoint.rpc_url).map_err(|e| {
                SdkError::Config(format!(
                    "invalid rpc_url {:?} for {}: {}",
                    endpoint.rpc_url, network, e
                ))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(SdkError::Config(format!(
                    "rpc_url for {} must be http(s), got {}",
                    network,
                    url.scheme()
                )));
            }
            if endpoint.timeout_seconds == 0 {
                return Err(SdkError::Config(format!(
                    "timeout_seconds for {} must be positive",
                    network
                )));
            }
            endpoints.insert(network, endpoint.clone());
        }
        Ok(endpoints)
    }

    /// Multicall address overrides from `[networks.<id>].multicall_address`.
    pub fn multicall_overrides(&self) -> Result<HashMap<Network, Address>, SdkError> {
        let mut overrides = HashMap::new();
        for (id, endpoint) in &self.networks {
            if let Some(address) = &endpoint.multicall_address {
                let network = parse_network_id(id)?;
                overrides.insert(network, parse_address(network, address)?);
            }
        }
        Ok(overrides)
    }

    pub fn static_prices(&self) -> Result<HashMap<Network, HashMap<Address, Decimal>>, SdkError> {
        per_network(&self.prices.static_usd, |network, _, price| {
            if *price < Decimal::ZERO {
                return Err(SdkError::Config(format!(
                    "negative static price on {}",
                    network
                )));
            }
            Ok(*price)
        })
    }

    pub fn chainlink_feeds(&self) -> Result<HashMap<Network, HashMap<Address, Address>>, SdkError> {
        per_network(&self.prices.chainlink, |network, _, feed| {
            parse_address(network, feed)
        })
    }

    pub fn coingecko_ids(&self) -> Result<HashMap<Network, HashMap<Address, String>>, SdkError> {
        per_network(&self.prices.coingecko.ids, |_, _, id| Ok(id.trim().to_string()))
    }

    pub fn price_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.prices.cache_ttl_seconds)
    }
}

fn parse_network_id(id: &str) -> Result<Network, SdkError> {
    Network::from_str(id).map_err(|e| SdkError::Config(e.to_string()))
}

/// Parses a `network id -> token address -> V` table into typed keys.
fn per_network<V, T>(
    table: &HashMap<String, HashMap<String, V>>,
    mut convert: impl FnMut(Network, Address, &V) -> Result<T, SdkError>,
) -> Result<HashMap<Network, HashMap<Address, T>>, SdkError> {
    let mut out: HashMap<Network, HashMap<Address, T>> = HashMap::new();
    for (id, tokens) in table {
        let network = parse_network_id(id)?;
        let entry = out.entry(network).or_default();
        for (token, value) in tokens {
            let address = parse_address(network, token)?;
            entry.insert(address, convert(network, address, value)?);
        }
    }
    Ok(out)
}
