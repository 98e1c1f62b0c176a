// Protocol Adapters Module
// Position fetchers, balance fetchers and presenters for individual protocols

pub mod morpho;
pub mod synthetix;

pub use morpho::{MorphoBalanceFetcher, MorphoCompoundContractPositionFetcher, MorphoPositionPresenter};
pub use synthetix::SynthetixSynthTokenFetcher;
