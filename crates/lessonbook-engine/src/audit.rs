use chrono::Utc;
use lessonbook_core::{Booking, BookingChanges, CascadeSession, PackageUsageAudit};
use tracing::warn;
use uuid::Uuid;

use crate::cascade::StepOutcome;

/// Appends a package-usage audit row for a price change on a package booking.
/// Package hours are left alone; only the trail is written. Failures are
/// logged and reported, never raised.
pub async fn record_package_usage(
    session: &mut dyn CascadeSession,
    booking: &Booking,
    changes: &BookingChanges,
) -> StepOutcome {
    if !booking.is_package_funded() || !changes.price_changed() {
        return StepOutcome::NotRequired;
    }

    match append_audit(session, booking, changes).await {
        Ok(()) => StepOutcome::Applied,
        Err(err) => {
            warn!(booking_id = %booking.id, "package usage audit not written: {err:#}");
            StepOutcome::Failed {
                error: format!("{err:#}"),
            }
        }
    }
}

async fn append_audit(
    session: &mut dyn CascadeSession,
    booking: &Booking,
    changes: &BookingChanges,
) -> anyhow::Result<()> {
    let package_name = match booking.customer_package_id {
        Some(package_id) => session
            .customer_package(package_id)
            .await
            .ok()
            .flatten()
            .and_then(|package| package.package_name),
        None => None,
    };

    let audit = PackageUsageAudit {
        id: Uuid::new_v4(),
        booking_id: booking.id,
        customer_package_id: booking.customer_package_id,
        old_amount: changes.previous.base_amount(),
        new_amount: booking.base_amount(),
        package_name,
        created_at: Utc::now(),
    };

    session.append_package_usage(&audit).await
}
