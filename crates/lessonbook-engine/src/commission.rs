use lessonbook_core::{Booking, CascadeSession, CommissionRule, CommissionSource, ResolvedCommission};
use lessonbook_finance::first_matching_rule;

/// Resolves the commission rule for a booking: per-booking override, then the
/// instructor's rule for the service, then the instructor's default, then the
/// 50% house rule. Tiers are queried lazily and stop at the first hit. A
/// missing rule is never an error; a failing query is.
pub async fn resolve_commission(
    session: &mut dyn CascadeSession,
    booking: &Booking,
) -> anyhow::Result<ResolvedCommission> {
    let mut candidates = Vec::with_capacity(CommissionSource::TIERS.len());
    for tier in CommissionSource::TIERS {
        let rule = lookup_tier(session, tier, booking).await?;
        let matched = rule.is_some();
        candidates.push((tier, rule));
        if matched {
            break;
        }
    }

    Ok(first_matching_rule(candidates))
}

async fn lookup_tier(
    session: &mut dyn CascadeSession,
    tier: CommissionSource,
    booking: &Booking,
) -> anyhow::Result<Option<CommissionRule>> {
    match (tier, booking.instructor_id, booking.service_id) {
        (CommissionSource::BookingOverride, _, _) => session.booking_commission(booking.id).await,
        (CommissionSource::InstructorService, Some(instructor_id), Some(service_id)) => {
            session
                .instructor_service_commission(instructor_id, service_id)
                .await
        }
        (CommissionSource::InstructorDefault, Some(instructor_id), _) => {
            session.instructor_default_commission(instructor_id).await
        }
        _ => Ok(None),
    }
}
