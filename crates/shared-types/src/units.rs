//! Decimal-string amount parsing.
//!
//! Policy rule thresholds arrive from operators as decimal strings in the
//! asset's natural unit ("0.001"). They are normalized to wei once, at the
//! configuration boundary, so rule evaluation is exact integer comparison.

use primitive_types::U256;

use crate::errors::CoreError;

/// Decimal places of the base asset.
pub const ETH_DECIMALS: u32 = 18;

/// Parse a decimal string in the asset's natural unit into wei.
///
/// Rejects negative values, malformed digits, and fractional parts longer
/// than `decimals` (which would silently truncate value).
pub fn decimal_to_wei(raw: &str, decimals: u32) -> Result<U256, CoreError> {
    let s = raw.trim();
    if s.is_empty() || s.starts_with('-') || s.starts_with('+') {
        return Err(CoreError::Configuration(format!("invalid amount: {raw:?}")));
    }

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(CoreError::Configuration(format!("invalid amount: {raw:?}")));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(CoreError::Configuration(format!("invalid amount: {raw:?}")));
    }
    if frac_part.len() > decimals as usize {
        return Err(CoreError::Configuration(format!(
            "amount {raw:?} has more than {decimals} fractional digits"
        )));
    }

    let scale = U256::from(10u64).pow(U256::from(decimals));
    let int_wei = if int_part.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(int_part)
            .map_err(|_| CoreError::Configuration(format!("invalid amount: {raw:?}")))?
            .checked_mul(scale)
            .ok_or_else(|| CoreError::Configuration(format!("amount overflow: {raw:?}")))?
    };

    let frac_wei = if frac_part.is_empty() {
        U256::zero()
    } else {
        let padded = format!("{frac_part:0<width$}", width = decimals as usize);
        U256::from_dec_str(&padded)
            .map_err(|_| CoreError::Configuration(format!("invalid amount: {raw:?}")))?
    };

    int_wei
        .checked_add(frac_wei)
        .ok_or_else(|| CoreError::Configuration(format!("amount overflow: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_eth() {
        assert_eq!(
            decimal_to_wei("1", ETH_DECIMALS).unwrap(),
            U256::from_dec_str("1000000000000000000").unwrap()
        );
    }

    #[test]
    fn test_milli_eth() {
        assert_eq!(
            decimal_to_wei("0.001", ETH_DECIMALS).unwrap(),
            U256::from_dec_str("1000000000000000").unwrap()
        );
    }

    #[test]
    fn test_mixed_value() {
        assert_eq!(
            decimal_to_wei("2.5", ETH_DECIMALS).unwrap(),
            U256::from_dec_str("2500000000000000000").unwrap()
        );
    }

    #[test]
    fn test_bare_fraction() {
        assert_eq!(
            decimal_to_wei(".5", ETH_DECIMALS).unwrap(),
            U256::from_dec_str("500000000000000000").unwrap()
        );
    }

    #[test]
    fn test_rejects_too_many_fraction_digits() {
        let nineteen = "0.0000000000000000001";
        assert!(decimal_to_wei(nineteen, ETH_DECIMALS).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(decimal_to_wei("", ETH_DECIMALS).is_err());
        assert!(decimal_to_wei("-1", ETH_DECIMALS).is_err());
        assert!(decimal_to_wei("1.2.3", ETH_DECIMALS).is_err());
        assert!(decimal_to_wei("abc", ETH_DECIMALS).is_err());
        assert!(decimal_to_wei(".", ETH_DECIMALS).is_err());
    }
}
