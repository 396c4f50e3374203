//! # Token Amounts
//!
//! Whitelist amounts arrive as human-readable decimal strings ("1250",
//! "6666.67") and leave as exact wei integers — the amount times 10^18.
//! Fractional parts beyond 18 digits cannot be represented in wei and are
//! rejected rather than rounded; an airdrop that silently rounds is a bug
//! report waiting to happen.
//!
//! Amounts use `U256` because a 30-character integer amount scaled by 10^18
//! can reach 10^48, far past `u128`.

use alloy_primitives::U256;
use thiserror::Error;

use crate::config::{MAX_AMOUNT_LEN, TOKEN_DECIMALS};

/// One whole token in wei: 10^18.
const WEI_PER_TOKEN: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Why an amount string was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    /// The string is empty or longer than 30 characters.
    #[error("amount must be between 1 and 30 characters")]
    Length,

    /// Not a plain decimal number (`digits` or `digits.digits`).
    #[error("amount is not a valid decimal number")]
    Malformed,

    /// More than 18 fractional digits — not representable in wei.
    #[error("amount has more than 18 decimal places")]
    TooPrecise,

    /// Arithmetic overflow while scaling. Unreachable for inputs within the
    /// length bound, but the checked math keeps it honest.
    #[error("amount does not fit in 256 bits")]
    Overflow,
}

/// Parses a decimal token amount into its exact wei value.
///
/// Accepts `digits` or `digits.digits` with 1..=18 fractional digits. No
/// sign, no exponent, no separators, no leading or trailing dot.
pub fn parse_token_amount(s: &str) -> Result<U256, AmountError> {
    if s.is_empty() || s.len() > MAX_AMOUNT_LEN {
        return Err(AmountError::Length);
    }

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };

    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::Malformed);
    }

    let whole = U256::from_str_radix(int_part, 10).map_err(|_| AmountError::Malformed)?;
    let mut wei = whole
        .checked_mul(WEI_PER_TOKEN)
        .ok_or(AmountError::Overflow)?;

    if let Some(frac) = frac_part {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::Malformed);
        }
        if frac.len() > TOKEN_DECIMALS {
            return Err(AmountError::TooPrecise);
        }
        // Right-pad to 18 digits: "67" means 0.67 tokens, i.e. 67 * 10^16 wei.
        let mut frac_wei: u64 = 0;
        for b in frac.bytes() {
            frac_wei = frac_wei * 10 + u64::from(b - b'0');
        }
        for _ in frac.len()..TOKEN_DECIMALS {
            frac_wei *= 10;
        }
        wei = wei
            .checked_add(U256::from(frac_wei))
            .ok_or(AmountError::Overflow)?;
    }

    Ok(wei)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wei(s: &str) -> String {
        parse_token_amount(s).unwrap().to_string()
    }

    #[test]
    fn whole_amounts_scale_by_ten_to_eighteen() {
        assert_eq!(wei("0"), "0");
        assert_eq!(wei("1"), "1000000000000000000");
        assert_eq!(wei("1250"), "1250000000000000000000");
    }

    #[test]
    fn fractional_amounts_are_exact() {
        assert_eq!(wei("6666.67"), "6666670000000000000000");
        assert_eq!(wei("1250.00"), "1250000000000000000000");
        assert_eq!(wei("0.000000000000000001"), "1");
    }

    #[test]
    fn eighteen_digit_fractions_are_accepted() {
        assert_eq!(
            wei("53228.051486152399030389"),
            "53228051486152399030389"
        );
        assert_eq!(
            wei("16023.916666666666666667"),
            "16023916666666666666667"
        );
    }

    #[test]
    fn nineteen_digit_fraction_is_rejected() {
        assert_eq!(
            parse_token_amount("1.0000000000000000001"),
            Err(AmountError::TooPrecise)
        );
    }

    #[test]
    fn length_bounds() {
        assert_eq!(parse_token_amount(""), Err(AmountError::Length));
        // 30 characters is the maximum.
        let max = "9".repeat(30);
        assert!(parse_token_amount(&max).is_ok());
        let too_long = "9".repeat(31);
        assert_eq!(parse_token_amount(&too_long), Err(AmountError::Length));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        for bad in ["1250.", ".5", "1.2.3", "-1", "+1", "1e18", "12a0", "."] {
            assert_eq!(
                parse_token_amount(bad),
                Err(AmountError::Malformed),
                "should reject {bad:?}"
            );
        }
    }

    #[test]
    fn thirty_digit_whole_amount_fits() {
        // 10^30 - 1 tokens, scaled to wei, is on the order of 10^48 — well
        // inside 256 bits but far outside u128.
        let huge = "9".repeat(30);
        let value = parse_token_amount(&huge).unwrap();
        assert!(value > U256::from(u128::MAX));
    }
}
