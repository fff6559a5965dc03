//! Currency conversion at the payment-provider boundary.
//!
//! The ledger keeps amounts in major units. Minor units only exist when a
//! value is handed to the provider; every rounding step is half away from
//! zero.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{MentorError, Result};

/// Minor units per major unit for the supported currencies.
pub const MINOR_UNIT_FACTOR: i64 = 100;

const PLATFORM_FEE_PERCENT: i64 = 10;
const EXPERT_SHARE_PERCENT: i64 = 100 - PLATFORM_FEE_PERCENT;

/// Split of a session price as sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeBreakdown {
    pub amount_minor: i64,
    pub fee_minor: i64,
    pub net_minor: i64,
}

fn round_half_away(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

fn out_of_range(value: Decimal) -> MentorError {
    MentorError::Validation(format!("Amount {} is out of range", value))
}

fn to_i64(value: Decimal) -> Result<i64> {
    value.to_i64().ok_or_else(|| out_of_range(value))
}

/// Converts a major-unit amount to minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    let scaled = amount
        .checked_mul(Decimal::from(MINOR_UNIT_FACTOR))
        .ok_or_else(|| out_of_range(amount))?;
    to_i64(round_half_away(scaled))
}

/// Converts minor units back to a major-unit amount with two decimals.
pub fn from_minor_units(amount_minor: i64) -> Decimal {
    Decimal::new(amount_minor, 2)
}

fn percent_of(amount_minor: i64, percent: i64) -> Result<i64> {
    let share = Decimal::from(amount_minor)
        .checked_mul(Decimal::new(percent, 2))
        .ok_or_else(|| out_of_range(Decimal::from(amount_minor)))?;
    to_i64(round_half_away(share))
}

/// Platform fee: 10% of the minor-unit amount.
pub fn platform_fee_minor(amount_minor: i64) -> Result<i64> {
    percent_of(amount_minor, PLATFORM_FEE_PERCENT)
}

/// Expert payout: 90% of the minor-unit amount, rounded independently of
/// the fee.
pub fn net_payout_minor(amount_minor: i64) -> Result<i64> {
    percent_of(amount_minor, EXPERT_SHARE_PERCENT)
}

pub fn breakdown(amount: Decimal) -> Result<ChargeBreakdown> {
    if amount <= Decimal::ZERO {
        return Err(MentorError::Validation("Amount must be greater than zero".to_string()));
    }
    let amount_minor = to_minor_units(amount)?;
    Ok(ChargeBreakdown {
        amount_minor,
        fee_minor: platform_fee_minor(amount_minor)?,
        net_minor: net_payout_minor(amount_minor)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_amounts() {
        let b = breakdown(dec!(100.00)).unwrap();
        assert_eq!(b.amount_minor, 10000);
        assert_eq!(b.fee_minor, 1000);
        assert_eq!(b.net_minor, 9000);

        let b = breakdown(dec!(50)).unwrap();
        assert_eq!(b, ChargeBreakdown { amount_minor: 5000, fee_minor: 500, net_minor: 4500 });
    }

    #[test]
    fn test_non_round_amount_rounds_each_share_independently() {
        let b = breakdown(dec!(33.33)).unwrap();
        assert_eq!(b.amount_minor, 3333);
        assert_eq!(b.fee_minor, 333);
        assert_eq!(b.net_minor, 3000);
    }

    #[test]
    fn test_midpoints_round_away_from_zero() {
        // 0.005 major units is exactly half a cent.
        assert_eq!(to_minor_units(dec!(10.005)).unwrap(), 1001);
        // 15 * 0.10 = 1.5 and 15 * 0.90 = 13.5
        assert_eq!(platform_fee_minor(15).unwrap(), 2);
        assert_eq!(net_payout_minor(15).unwrap(), 14);
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        assert!(matches!(breakdown(dec!(0)), Err(MentorError::Validation(_))));
        assert!(matches!(breakdown(dec!(-5)), Err(MentorError::Validation(_))));
    }

    #[test]
    fn test_huge_amounts_are_validation_errors() {
        assert!(matches!(breakdown(Decimal::MAX), Err(MentorError::Validation(_))));
        assert!(matches!(to_minor_units(Decimal::MIN), Err(MentorError::Validation(_))));
        // Fits a Decimal but not an i64 once scaled to cents
        assert!(matches!(breakdown(dec!(100000000000000000)), Err(MentorError::Validation(_))));
        assert!(platform_fee_minor(i64::MAX).is_ok());
    }

    #[test]
    fn test_from_minor_units() {
        assert_eq!(from_minor_units(4500), dec!(45.00));
    }
}
