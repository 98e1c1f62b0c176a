// src/contract_factory.rs

use crate::contracts::{
    AggregatorV3Interface, CompoundCToken, Erc20, MorphoCompoundLens, SynthetixAddressResolver,
    SynthetixNetworkToken, SynthetixSummaryUtil,
};
use crate::errors::SdkError;
use crate::multicall::MULTICALL3_ADDRESS;
use crate::network::Network;
use crate::network_provider::{NetworkProviderRegistry, ReadProvider};
use crate::settings::Settings;
use crate::types::conversions::parse_address;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;

/// `(network, address)` pair naming a contract. The interface is chosen by the binding type
/// the descriptor is built into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractDescriptor {
    pub network: Network,
    pub address: String,
}

impl ContractDescriptor {
    pub fn new(network: Network, address: impl Into<String>) -> Self {
        Self {
            network,
            address: address.into(),
        }
    }
}

/// A contract binding that can be attached to an address and a provider.
pub trait ContractBinding: Sized {
    fn bind(address: Address, provider: Arc<ReadProvider>) -> Self;
}

macro_rules! impl_contract_binding {
    ($($binding:ident),* $(,)?) => {
        $(
            impl ContractBinding for $binding<ReadProvider> {
                fn bind(address: Address, provider: Arc<ReadProvider>) -> Self {
                    $binding::new(address, provider)
                }
            }
        )*
    };
}

impl_contract_binding!(
    AggregatorV3Interface,
    CompoundCToken,
    Erc20,
    MorphoCompoundLens,
    SynthetixAddressResolver,
    SynthetixNetworkToken,
    SynthetixSummaryUtil,
);

/// Builds typed contract handles bound to the network's provider.
///
/// Construction is pure apart from the provider lookup: no calls are made and nothing is
/// checked on-chain.
#[derive(Clone)]
pub struct ContractFactory {
    providers: Arc<NetworkProviderRegistry>,
}

impl ContractFactory {
    pub fn new(providers: Arc<NetworkProviderRegistry>) -> Self {
        Self { providers }
    }

    pub fn build<C: ContractBinding>(&self, descriptor: &ContractDescriptor) -> Result<C, SdkError> {
        let address = parse_address(descriptor.network, &descriptor.address)?;
        let provider = self.providers.get_provider(descriptor.network)?;
        Ok(C::bind(address, provider))
    }

    pub fn build_at<C: ContractBinding>(&self, network: Network, address: Address) -> Result<C, SdkError> {
        let provider = self.providers.get_provider(network)?;
        Ok(C::bind(address, provider))
    }

    pub fn erc20(&self, network: Network, address: Address) -> Result<Erc20<ReadProvider>, SdkError> {
        self.build_at(network, address)
    }

    pub fn synthetix_address_resolver(
        &self,
        descriptor: &ContractDescriptor,
    ) -> Result<SynthetixAddressResolver<ReadProvider>, SdkError> {
        self.build(descriptor)
    }

    pub fn synthetix_summary_util(
        &self,
        network: Network,
        address: Address,
    ) -> Result<SynthetixSummaryUtil<ReadProvider>, SdkError> {
        self.build_at(network, address)
    }

    pub fn synthetix_network_token(
        &self,
        network: Network,
        address: Address,
    ) -> Result<SynthetixNetworkToken<ReadProvider>, SdkError> {
        self.build_at(network, address)
    }

    pub fn morpho_compound_lens(
        &self,
        descriptor: &ContractDescriptor,
    ) -> Result<MorphoCompoundLens<ReadProvider>, SdkError> {
        self.build(descriptor)
    }

    pub fn compound_ctoken(
        &self,
        network: Network,
        address: Address,
    ) -> Result<CompoundCToken<ReadProvider>, SdkError> {
        self.build_at(network, address)
    }

    pub fn chainlink_aggregator(
        &self,
        network: Network,
        address: Address,
    ) -> Result<AggregatorV3Interface<ReadProvider>, SdkError> {
        self.build_at(network, address)
    }
}

/// Aggregator (Multicall3) contract address per network.
#[derive(Debug, Clone, Default)]
pub struct AggregatorBook {
    addresses: HashMap<Network, Address>,
}

impl AggregatorBook {
    pub fn new(addresses: HashMap<Network, Address>) -> Self {
        Self { addresses }
    }

    /// Multicall3 on every known network.
    pub fn with_defaults() -> Self {
        let mut addresses = HashMap::new();
        if let Ok(multicall3) = MULTICALL3_ADDRESS.parse::<Address>() {
            for network in Network::ALL {
                addresses.insert(network, multicall3);
            }
        }
        Self { addresses }
    }

    /// Defaults overlaid with `[networks.<id>].multicall_address`.
    pub fn from_settings(settings: &Settings) -> Result<Self, SdkError> {
        let mut book = Self::with_defaults();
        book.addresses.extend(settings.multicall_overrides()?);
        Ok(book)
    }

    pub fn insert(&mut self, network: Network, address: Address) {
        self.addresses.insert(network, address);
    }

    pub fn aggregator_address(&self, network: Network) -> Result<Address, SdkError> {
        self.addresses.get(&network).copied().ok_or_else(|| {
            SdkError::unsupported_network(network, "no multicall aggregator deployed")
        })
    }
}
