use crate::errors::SdkError;
use crate::network::Network;
use ethers::types::Address;
use std::str::FromStr;

/// Lower-case, `0x`-prefixed, full-length hex form of an address.
pub fn address_to_string(addr: Address) -> String {
    format!("{:?}", addr).to_lowercase()
}

/// Parses an EVM address, requiring the `0x` prefix and exactly 20 bytes of hex.
///
/// Checksums are not enforced; mixed-case input is accepted as-is.
pub fn parse_address(network: Network, s: &str) -> Result<Address, SdkError> {
    let trimmed = s.trim();
    let invalid = || SdkError::InvalidAddress {
        network,
        address: s.to_string(),
    };

    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(invalid)?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    Address::from_str(hex_part).map_err(|_| invalid())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),
    #[error("overflow in conversion")]
    Overflow,
}
