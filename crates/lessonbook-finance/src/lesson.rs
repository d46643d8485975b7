use lessonbook_core::PaymentStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::round2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountBasis {
    /// Price stored on the booking.
    Direct,
    /// Package price spread over the package's hours.
    PackageHours,
    /// Package price spread over its session count.
    PackageSessions,
    /// Package economics unusable; the booking's own price was kept.
    BaseFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonAmount {
    pub value: Decimal,
    pub basis: AmountBasis,
}

impl LessonAmount {
    pub fn direct(value: Decimal) -> Self {
        Self {
            value: round2(value),
            basis: AmountBasis::Direct,
        }
    }

    pub fn fallback(value: Decimal) -> Self {
        Self {
            value: round2(value),
            basis: AmountBasis::BaseFallback,
        }
    }
}

/// Everything known about a booking and its package when pricing a lesson.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LessonAmountInputs {
    pub payment_status: PaymentStatus,
    pub duration: Decimal,
    pub base_amount: Decimal,
    pub package_price: Option<Decimal>,
    pub package_total_hours: Option<Decimal>,
    pub package_remaining_hours: Option<Decimal>,
    pub package_used_hours: Option<Decimal>,
    pub package_sessions_count: Option<i32>,
    pub fallback_session_duration: Option<Decimal>,
}

/// Prices one lesson. Individual bookings keep their own price; package
/// bookings derive it from what the package cost, because the stored price of
/// a package booking is not what the customer paid for that hour.
pub fn derive_lesson_amount(inputs: &LessonAmountInputs) -> LessonAmount {
    if inputs.payment_status != PaymentStatus::Package {
        return LessonAmount::direct(inputs.base_amount);
    }

    match package_share(inputs) {
        Some((value, basis)) => LessonAmount {
            value: round2(value),
            basis,
        },
        None => LessonAmount::fallback(inputs.base_amount),
    }
}

fn package_share(inputs: &LessonAmountInputs) -> Option<(Decimal, AmountBasis)> {
    let price = positive(inputs.package_price)?;

    if let Some(hours) = package_hours(inputs)
        && inputs.duration > Decimal::ZERO
    {
        let value = price.checked_div(hours)?.checked_mul(inputs.duration)?;
        return Some((value, AmountBasis::PackageHours));
    }

    let sessions = inputs.package_sessions_count.filter(|count| *count > 0)?;
    let value = price.checked_div(Decimal::from(sessions))?;
    Some((value, AmountBasis::PackageSessions))
}

/// Hours the package price pays for: the declared total, else what has been
/// used plus what is left, else sessions times the template session length.
fn package_hours(inputs: &LessonAmountInputs) -> Option<Decimal> {
    if let Some(total) = positive(inputs.package_total_hours) {
        return Some(total);
    }

    if let (Some(used), Some(remaining)) = (inputs.package_used_hours, inputs.package_remaining_hours)
    {
        let total = used + remaining;
        if total > Decimal::ZERO {
            return Some(total);
        }
    }

    let sessions = inputs.package_sessions_count.filter(|count| *count > 0)?;
    let session_hours = positive(inputs.fallback_session_duration)?;
    session_hours.checked_mul(Decimal::from(sessions))
}

fn positive(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|value| *value > Decimal::ZERO)
}
