//! # Position Aggregator SDK
//!
//! A Rust library for reading DeFi positions across EVM networks and valuing them in USD.
//! Contract reads are coalesced into Multicall3 `aggregate3` batches, and positions are
//! normalized into app tokens and contract positions with per-token balances.
//!
//! ## Overview
//!
//! - **Batching**: Deferred contract reads collected into one `eth_call` per batch
//! - **Pricing**: Base token prices from static config, Chainlink feeds and CoinGecko
//! - **Positions**: App-token and contract-position pipelines with validation and retries
//! - **Presentation**: Balances grouped into products with summary lines
//!
//! ## Architecture
//!
//! ### Network Layer
//! One lazily built read provider and call transport per configured network.
//!
//! ### Batching Layer
//! [`Multicall`] queues reads and hands back [`multicall::Deferred`] results that resolve
//! when the batch executes. A failed batch fails each of its reads; a failed decode fails
//! only its own read.
//!
//! ### Valuation Layer
//! Protocol integrations implement [`PositionFetcher`] and [`BalanceFetcher`] on top of the
//! [`AppToolkit`] capability set.

// Core Types
/// Networks and their identifiers
pub mod network;
/// Error taxonomy
pub mod errors;
/// Position, balance and display types
pub mod types;
/// Decimal scaling of raw on-chain integers
pub mod normalization;

// Batching
/// Multicall3 batch collector
pub mod multicall;
/// Contract bindings (read-only ABIs)
pub mod contracts;
/// Per-network read providers
pub mod network_provider;
/// Typed contract construction
pub mod contract_factory;

// Pricing
/// Base token price sources
pub mod price_feeds;
/// CoinGecko price source
pub mod coingecko_price_source;
/// Token prices and metadata
pub mod token_service;

// Positions
/// Fetcher and presenter traits
pub mod position_fetcher;
/// Position pipelines and registry
pub mod position_service;
/// Product grouping and summary lines
pub mod presentation;
/// Capability set given to protocol integrations
pub mod app_toolkit;
/// Protocol integrations
pub mod adapters;

// Infrastructure
/// Configuration management
pub mod settings;
/// Logger setup
pub mod logging;
/// Metrics and observability
pub mod metrics;

// Re-exports for convenience
pub use app_toolkit::{AppToolkit, Toolkit};
pub use errors::{PositionError, SdkError};
pub use multicall::Multicall;
pub use network::Network;
pub use position_fetcher::{BalanceFetcher, PositionFetcher, PositionPresenter};
pub use settings::Settings;
