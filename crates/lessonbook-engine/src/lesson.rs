use anyhow::Context;
use lessonbook_core::{Booking, CascadeSession, PaymentStatus};
use lessonbook_finance::{LessonAmount, LessonAmountInputs, derive_lesson_amount};
use rust_decimal::Decimal;
use tracing::warn;

/// Monetary value of one lesson.
///
/// Package bookings are priced from their package. Fails open: if the package
/// cannot be loaded or priced, logs and returns the booking's own price, so
/// earnings may be recorded against a stale price.
pub async fn compute_lesson_amount(
    session: &mut dyn CascadeSession,
    booking: &Booking,
) -> LessonAmount {
    if !booking.is_package_funded() {
        return derive_lesson_amount(&LessonAmountInputs {
            payment_status: PaymentStatus::Individual,
            duration: booking.duration,
            base_amount: booking.base_amount(),
            ..LessonAmountInputs::default()
        });
    }

    match package_inputs(session, booking).await {
        Ok(inputs) => derive_lesson_amount(&inputs),
        Err(err) => {
            warn!(
                booking_id = %booking.id,
                "package lookup failed, keeping booking price: {err:#}"
            );
            LessonAmount::fallback(booking.base_amount())
        }
    }
}

async fn package_inputs(
    session: &mut dyn CascadeSession,
    booking: &Booking,
) -> anyhow::Result<LessonAmountInputs> {
    let package_id = booking
        .customer_package_id
        .context("package booking has no customer package")?;
    let package = session
        .customer_package(package_id)
        .await?
        .with_context(|| format!("customer package {package_id} not found"))?;

    let own_total = package.total_hours.filter(|hours| *hours > Decimal::ZERO);
    let template = match (own_total, package.service_package_id) {
        (None, Some(template_id)) => session.service_package(template_id).await?,
        _ => None,
    };

    Ok(LessonAmountInputs {
        payment_status: PaymentStatus::Package,
        duration: booking.duration,
        base_amount: booking.base_amount(),
        package_price: package.purchase_price,
        package_total_hours: own_total
            .or_else(|| template.as_ref().and_then(|template| template.total_hours)),
        package_remaining_hours: package.remaining_hours,
        package_used_hours: package.used_hours,
        package_sessions_count: template.as_ref().and_then(|template| template.sessions_count),
        fallback_session_duration: template.as_ref().and_then(|template| template.duration_hours),
    })
}
