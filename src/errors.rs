// src/errors.rs

use crate::network::Network;
use crate::types::conversions::ConversionError;
use serde::Serialize;

/// Reason prefix of a `Decode` error raised for a sub-call that reverted on chain.
pub const REVERT_REASON_PREFIX: &str = "call reverted";

/// Error taxonomy shared by the provider, contract, batching and valuation layers.
///
/// Every variant is `Clone` so a single aggregated-call failure can be delivered to each
/// deferred read of the batch that produced it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SdkError {
    #[error("network {network} is not supported: {reason}")]
    UnsupportedNetwork { network: Network, reason: String },

    #[error("invalid address {address:?} on {network}")]
    InvalidAddress { network: Network, address: String },

    #[error("multicall batch of {calls} call(s) on {network} failed: {cause}")]
    BatchExecution {
        network: Network,
        calls: usize,
        cause: String,
    },

    #[error("failed to decode {function} from {target}: {reason}")]
    Decode {
        target: String,
        function: String,
        reason: String,
    },

    #[error("no USD price for {address} on {network}")]
    PriceUnavailable { network: Network, address: String },

    #[error("price source failed on {network}: {cause}")]
    PriceSource { network: Network, cause: String },

    #[error("invalid position {address}: {reason}")]
    InvalidPosition { address: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl SdkError {
    pub fn unsupported_network(network: Network, reason: impl Into<String>) -> Self {
        Self::UnsupportedNetwork {
            network,
            reason: reason.into(),
        }
    }

    /// Whether re-issuing the same reads can succeed.
    ///
    /// Only aggregated-call failures qualify: reads are idempotent, and every other variant
    /// is either a configuration gap or a deterministic decode/valuation failure.
    /// True when the target contract reverted, as opposed to answering with data that
    /// did not decode.
    pub fn is_revert(&self) -> bool {
        matches!(self, SdkError::Decode { reason, .. } if reason.starts_with(REVERT_REASON_PREFIX))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SdkError::BatchExecution { .. })
    }

    /// Short machine-readable code, used in error notes attached to responses.
    pub fn code(&self) -> &'static str {
        match self {
            SdkError::UnsupportedNetwork { .. } => "unsupported_network",
            SdkError::InvalidAddress { .. } => "invalid_address",
            SdkError::BatchExecution { .. } => "batch_execution",
            SdkError::Decode { .. } => "decode",
            SdkError::PriceUnavailable { .. } => "price_unavailable",
            SdkError::PriceSource { .. } => "price_source",
            SdkError::InvalidPosition { .. } => "invalid_position",
            SdkError::Config(_) => "config",
            SdkError::Conversion(_) => "conversion",
        }
    }
}

/// A position instance that was omitted from a result, kept as metadata for the caller.
#[derive(Debug, Clone, Serialize)]
pub struct PositionError {
    /// Identifies the omitted instance (token symbol, market address, or the group id
    /// when the whole group failed).
    pub instance: String,
    pub code: &'static str,
    pub message: String,
    #[serde(skip)]
    pub error: SdkError,
}

impl PositionError {
    pub fn new(instance: impl Into<String>, error: SdkError) -> Self {
        Self {
            instance: instance.into(),
            code: error.code(),
            message: error.to_string(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_batch_failures_are_retryable() {
        let batch = SdkError::BatchExecution {
            network: Network::Ethereum,
            calls: 3,
            cause: "connection reset".into(),
        };
        let decode = SdkError::Decode {
            target: "0x01".into(),
            function: "totalSupply".into(),
            reason: "short".into(),
        };
        assert!(batch.is_retryable());
        assert!(!decode.is_retryable());
        assert!(!SdkError::unsupported_network(Network::Celo, "no endpoint").is_retryable());
    }

    #[test]
    fn reverts_are_told_apart_from_malformed_data() {
        let reverted = SdkError::Decode {
            target: "0x01".into(),
            function: "underlying".into(),
            reason: format!("{} (0x)", REVERT_REASON_PREFIX),
        };
        let malformed = SdkError::Decode {
            target: "0x01".into(),
            function: "underlying".into(),
            reason: "Invalid data".into(),
        };
        assert!(reverted.is_revert());
        assert!(!malformed.is_revert());
        assert!(!SdkError::unsupported_network(Network::Celo, "no endpoint").is_revert());
    }

    #[test]
    fn position_error_carries_code_and_message() {
        let note = PositionError::new(
            "sUSD",
            SdkError::PriceUnavailable {
                network: Network::Optimism,
                address: "0xabc".into(),
            },
        );
        assert_eq!(note.code, "price_unavailable");
        assert_eq!(note.message, "no USD price for 0xabc on optimism");
    }
}
