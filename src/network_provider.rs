// src/network_provider.rs

use crate::errors::SdkError;
use crate::multicall::{CallTransport, MiddlewareTransport};
use crate::network::Network;
use crate::settings::NetworkEndpoint;
use dashmap::DashMap;
use ethers::prelude::{Http, Provider};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;

/// Network handle shared by contract bindings built for one network.
pub type ReadProvider = Provider<Http>;

/// Resolves a [`Network`] to its provider handle.
///
/// Providers are created on first use and cached for the life of the registry, so repeated
/// lookups for one network return the same `Arc`. Each provider's HTTP client carries the
/// endpoint's request timeout. Nothing here retries; failed calls surface to the caller.
pub struct NetworkProviderRegistry {
    endpoints: HashMap<Network, NetworkEndpoint>,
    providers: DashMap<Network, Arc<ReadProvider>>,
    transports: DashMap<Network, Arc<dyn CallTransport>>,
}

impl NetworkProviderRegistry {
    pub fn new(endpoints: HashMap<Network, NetworkEndpoint>) -> Self {
        info!(
            "Network provider registry configured for {} network(s)",
            endpoints.len()
        );
        Self {
            endpoints,
            providers: DashMap::new(),
            transports: DashMap::new(),
        }
    }

    pub fn is_supported(&self, network: Network) -> bool {
        self.endpoints.contains_key(&network)
    }

    pub fn networks(&self) -> Vec<Network> {
        let mut networks: Vec<Network> = self.endpoints.keys().copied().collect();
        networks.sort();
        networks
    }

    pub fn endpoint(&self, network: Network) -> Result<&NetworkEndpoint, SdkError> {
        self.endpoints.get(&network).ok_or_else(|| {
            SdkError::unsupported_network(network, "no RPC endpoint configured")
        })
    }

    /// Provider for `network`, created on first call.
    pub fn get_provider(&self, network: Network) -> Result<Arc<ReadProvider>, SdkError> {
        if let Some(provider) = self.providers.get(&network) {
            return Ok(Arc::clone(provider.value()));
        }

        let endpoint = self.endpoint(network)?;
        let provider = self
            .providers
            .entry(network)
            .or_try_insert_with(|| build_provider(network, endpoint).map(Arc::new))?;
        Ok(Arc::clone(provider.value()))
    }

    /// Transport the batch engine sends aggregated calls through.
    ///
    /// Defaults to `eth_call` over the cached provider.
    pub fn transport(&self, network: Network) -> Result<Arc<dyn CallTransport>, SdkError> {
        if let Some(transport) = self.transports.get(&network) {
            return Ok(Arc::clone(transport.value()));
        }
        let provider = self.get_provider(network)?;
        Ok(Arc::new(MiddlewareTransport::new(provider)))
    }

    /// Routes aggregated calls for `network` through `transport` instead of the provider.
    pub fn register_transport(&self, network: Network, transport: Arc<dyn CallTransport>) {
        debug!("Custom call transport registered for {}", network);
        self.transports.insert(network, transport);
    }
}

fn build_provider(network: Network, endpoint: &NetworkEndpoint) -> Result<ReadProvider, SdkError> {
    let url = url::Url::parse(&endpoint.rpc_url).map_err(|e| {
        SdkError::unsupported_network(network, format!("invalid RPC URL: {}", e))
    })?;
    let client = reqwest::Client::builder()
        .timeout(endpoint.timeout())
        .build()
        .map_err(|e| {
            SdkError::unsupported_network(network, format!("HTTP client setup failed: {}", e))
        })?;
    debug!(
        "Creating provider for {} (timeout {}s)",
        network, endpoint.timeout_seconds
    );
    Ok(Provider::new(Http::new_with_client(url, client)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NetworkProviderRegistry {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            Network::Polygon,
            NetworkEndpoint::new("http://127.0.0.1:8545"),
        );
        NetworkProviderRegistry::new(endpoints)
    }

    #[test]
    fn repeated_lookups_return_the_same_provider() {
        let registry = registry();
        let first = registry.get_provider(Network::Polygon).unwrap();
        let second = registry.get_provider(Network::Polygon).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unconfigured_network_is_unsupported() {
        let registry = registry();
        assert!(matches!(
            registry.get_provider(Network::Celo),
            Err(SdkError::UnsupportedNetwork {
                network: Network::Celo,
                ..
            })
        ));
        assert!(registry.transport(Network::Celo).is_err());
    }

    #[test]
    fn malformed_url_is_reported_on_first_use() {
        let mut endpoints = HashMap::new();
        endpoints.insert(Network::Gnosis, NetworkEndpoint::new("not a url"));
        let registry = NetworkProviderRegistry::new(endpoints);
        assert!(registry.is_supported(Network::Gnosis));
        assert!(registry.get_provider(Network::Gnosis).is_err());
    }
}
