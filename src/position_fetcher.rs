//! # Position Adapter Traits
//!
//! This module defines the seams protocol integrations plug into. An integration implements
//! [`PositionFetcher`] for each of its position groups, and optionally [`BalanceFetcher`] and
//! [`PositionPresenter`] to report a wallet's holdings.
//!
//! ## Overview
//!
//! Fetchers only read and describe; validation, retries, error collection and registration
//! of results are done by [`crate::position_service::PositionService`]. A fetcher reaches
//! the network exclusively through the [`crate::app_toolkit::AppToolkit`] it is built with,
//! so every read it issues goes through a batch collector.
//!
//! ## Adding a Protocol
//!
//! 1. Bind the protocol's read interface in `contracts/` and add a typed helper to
//!    [`crate::contract_factory::ContractFactory`]
//! 2. Implement [`PositionFetcher`] per group, returning one outcome per instance
//! 3. Implement [`BalanceFetcher`] if wallet balances are needed
//!
//! ## Example
//!
//! ```rust,ignore
//! struct VaultTokenFetcher {
//!     toolkit: Arc<dyn AppToolkit>,
//! }
//!
//! #[async_trait]
//! impl PositionFetcher for VaultTokenFetcher {
//!     type Position = AppTokenPosition<VaultDataProps>;
//!
//!     fn app_id(&self) -> &str { "vaults" }
//!     fn group_id(&self) -> &str { "vault" }
//!     fn network(&self) -> Network { Network::Ethereum }
//!
//!     async fn fetch(&self) -> Result<Vec<Result<Self::Position, PositionError>>, SdkError> {
//!         let multicall = self.toolkit.multicall(self.network())?;
//!         // Record every read against `multicall`, then await the deferred values.
//!         // ...
//!     }
//! }
//! ```

use crate::errors::{PositionError, SdkError};
use crate::network::Network;
use crate::presentation::TokenBalanceResponse;
use crate::types::display::MetadataItemWithLabel;
use crate::types::position::{PositionBalance, PositionRecord};
use async_trait::async_trait;
use ethers::types::Address;

/// Produces the positions of one `(app, group)` on one network.
///
/// # Implementation Requirements
///
/// - `fetch()` returns `Err` only when the group as a whole cannot be described (its entry
///   contract cannot be read, for example). A failure specific to one instance belongs in
///   that instance's slot so the rest of the group is still reported.
/// - Reads must be idempotent: the pipeline may call `fetch()` again after a
///   [`SdkError::BatchExecution`].
#[async_trait]
pub trait PositionFetcher: Send + Sync {
    type Position: PositionRecord + Send + 'static;

    fn app_id(&self) -> &str;

    fn group_id(&self) -> &str;

    fn network(&self) -> Network;

    async fn fetch(&self) -> Result<Vec<Result<Self::Position, PositionError>>, SdkError>;
}

/// Reports a wallet's balances in an app, grouped into products.
#[async_trait]
pub trait BalanceFetcher: Send + Sync {
    fn app_id(&self) -> &str;

    fn network(&self) -> Network;

    async fn get_balances(&self, address: Address) -> Result<TokenBalanceResponse, SdkError>;
}

/// Product-level summary lines that need more than the balances themselves
/// (health factors, protocol-side collateral accounting).
#[async_trait]
pub trait PositionPresenter: Send + Sync {
    fn app_id(&self) -> &str;

    fn network(&self) -> Network;

    async fn product_meta(
        &self,
        label: &str,
        address: Address,
        balances: &[PositionBalance],
    ) -> Result<Vec<MetadataItemWithLabel>, SdkError>;
}

/// Selects registered positions of one app on one network, optionally narrowed to groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppGroupsDefinition {
    pub app_id: String,
    /// Empty means every group of the app.
    pub group_ids: Vec<String>,
    pub network: Network,
}

impl AppGroupsDefinition {
    pub fn new(app_id: impl Into<String>, network: Network) -> Self {
        Self {
            app_id: app_id.into(),
            group_ids: Vec::new(),
            network,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_ids.push(group_id.into());
        self
    }

    pub fn matches(&self, network: Network, app_id: &str, group_id: &str) -> bool {
        self.network == network
            && self.app_id == app_id
            && (self.group_ids.is_empty() || self.group_ids.iter().any(|g| g == group_id))
    }
}
