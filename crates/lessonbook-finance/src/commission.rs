use lessonbook_core::{CommissionRule, CommissionSource, CommissionType, ResolvedCommission};
use rust_decimal::Decimal;

use crate::money::round2;

/// Walks candidate rules in priority order and returns the first present one,
/// or the 50% house rule when every tier came back empty.
pub fn first_matching_rule<I>(candidates: I) -> ResolvedCommission
where
    I: IntoIterator<Item = (CommissionSource, Option<CommissionRule>)>,
{
    candidates
        .into_iter()
        .find_map(|(source, rule)| rule.map(|rule| ResolvedCommission { source, rule }))
        .unwrap_or_else(|| ResolvedCommission {
            source: CommissionSource::Fallback,
            rule: CommissionRule::house_default(),
        })
}

pub fn compute_instructor_earnings(
    commission_type: &CommissionType,
    commission_value: Decimal,
    lesson_amount: Decimal,
    duration: Decimal,
) -> Decimal {
    let earnings = match commission_type {
        CommissionType::Percentage => lesson_amount * commission_value / Decimal::ONE_HUNDRED,
        CommissionType::FixedPerHour => commission_value * duration,
        CommissionType::FixedPerLesson => commission_value,
        CommissionType::Unknown(_) => Decimal::ZERO,
    };

    round2(earnings)
}

/// Share of the lesson amount paid out, as stored on the earnings row (0..=1).
/// Fixed rules have no inherent rate, so it is derived from what they pay.
pub fn commission_rate_fraction(
    rule: &CommissionRule,
    lesson_amount: Decimal,
    earnings: Decimal,
) -> Decimal {
    let rate = match rule.commission_type {
        CommissionType::Percentage => rule.commission_value / Decimal::ONE_HUNDRED,
        _ if lesson_amount > Decimal::ZERO => earnings / lesson_amount,
        _ => Decimal::ZERO,
    };

    rate.clamp(Decimal::ZERO, Decimal::ONE).round_dp(4)
}
