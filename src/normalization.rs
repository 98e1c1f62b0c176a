// src/normalization.rs
//
// Decimal normalization of raw on-chain integers. All USD math in the SDK goes through
// `rust_decimal` so chained divisions (raw / 10^decimals, rate / 1e18, ...) do not drift.

use crate::types::conversions::ConversionError;
use ethers::types::U256;
use rust_decimal::Decimal;

/// Largest scale `rust_decimal` can represent.
pub const MAX_SCALE: u8 = 28;

/// Decimals of the 18-decimal fixed-point values returned by most lenses and rate feeds.
pub const WAD_DECIMALS: u8 = 18;

/// Mantissa of a `Decimal` is 96 bits.
const MANTISSA_BITS: usize = 96;

/// Normalize a base-unit amount into a human decimal using token decimals.
///
/// Exact whenever `raw` fits the 96-bit mantissa. Larger values are split into whole and
/// fractional parts; tokens with more than 28 decimals lose the digits beyond the 28th.
pub fn normalize_amount(raw: U256, decimals: u8) -> Result<Decimal, ConversionError> {
    let (raw, scale) = if decimals > MAX_SCALE {
        (raw / U256::exp10(usize::from(decimals - MAX_SCALE)), MAX_SCALE)
    } else {
        (raw, decimals)
    };

    if raw.bits() <= MANTISSA_BITS {
        return mantissa_with_scale(raw, scale);
    }

    let divisor = U256::exp10(usize::from(scale));
    let whole = raw / divisor;
    let fraction = raw % divisor;
    if whole.bits() > MANTISSA_BITS {
        return Err(ConversionError::Overflow);
    }
    let whole = mantissa_with_scale(whole, 0)?;
    let fraction = mantissa_with_scale(fraction, scale)?;
    whole.checked_add(fraction).ok_or(ConversionError::Overflow)
}

fn mantissa_with_scale(raw: U256, scale: u8) -> Result<Decimal, ConversionError> {
    if raw.bits() > MANTISSA_BITS {
        return Err(ConversionError::Overflow);
    }
    let mantissa = i128::try_from(raw.as_u128()).map_err(|_| ConversionError::Overflow)?;
    Decimal::try_from_i128_with_scale(mantissa, u32::from(scale))
        .map_err(|e| ConversionError::InvalidDecimal(e.to_string()))
}

/// `formatUnits(value)` for 18-decimal fixed-point values.
pub fn format_units_18(raw: U256) -> Result<Decimal, ConversionError> {
    normalize_amount(raw, WAD_DECIMALS)
}

/// USD value of `amount` at `price`, failing instead of panicking on overflow.
pub fn usd_value(amount: Decimal, price: Decimal) -> Result<Decimal, ConversionError> {
    amount.checked_mul(price).ok_or(ConversionError::Overflow)
}
