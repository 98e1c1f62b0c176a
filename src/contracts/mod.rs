// Contracts Module - Public ABIs Only

pub mod aggregator_v3_interface;
pub mod compound;
pub mod erc20;
pub mod morpho;
pub mod synthetix;

// Public exports
pub use aggregator_v3_interface::AggregatorV3Interface;
pub use compound::CompoundCToken;
pub use erc20::Erc20;
pub use morpho::MorphoCompoundLens;
pub use synthetix::{SynthetixAddressResolver, SynthetixNetworkToken, SynthetixSummaryUtil};
