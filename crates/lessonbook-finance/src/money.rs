use rust_decimal::{Decimal, RoundingStrategy};

/// Smallest difference treated as a real change in money values.
pub const CENT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Rounds to minor currency units, halves away from zero.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub(crate) fn exceeds_cent(a: Decimal, b: Decimal) -> bool {
    a.checked_sub(b).is_none_or(|difference| difference.abs() > CENT)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round2(Decimal::from_str("2.345").unwrap()), Decimal::from_str("2.35").unwrap());
        assert_eq!(round2(Decimal::from_str("-2.345").unwrap()), Decimal::from_str("-2.35").unwrap());
        assert_eq!(round2(Decimal::from_str("33.3333").unwrap()), Decimal::from_str("33.33").unwrap());
    }

    #[test]
    fn one_cent_is_noise() {
        let a = Decimal::from_str("10.00").unwrap();
        assert!(!exceeds_cent(a, Decimal::from_str("10.01").unwrap()));
        assert!(exceeds_cent(a, Decimal::from_str("10.02").unwrap()));
    }

    #[test]
    fn unrepresentable_difference_exceeds_a_cent() {
        assert!(exceeds_cent(Decimal::MAX, -Decimal::MAX));
    }
}
