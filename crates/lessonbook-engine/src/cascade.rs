use chrono::Utc;
use lessonbook_core::{
    AnalyticsCache, Booking, BookingChanges, BookingField, CascadeSession, InstructorEarning,
    LedgerEntry, LedgerStore, ResolvedCommission,
};
use lessonbook_finance::{
    CENT, LessonAmount, commission_rate_fraction, compute_instructor_earnings, round2,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::record_package_usage;
use crate::commission::resolve_commission;
use crate::error::CascadeError;
use crate::lesson::compute_lesson_amount;

const FINANCIAL_FIELDS: [BookingField; 4] = [
    BookingField::FinalAmount,
    BookingField::Amount,
    BookingField::Duration,
    BookingField::InstructorId,
];

const COMMISSION_FIELDS: [BookingField; 3] = [
    BookingField::InstructorCommission,
    BookingField::InstructorId,
    BookingField::ServiceId,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CascadeGates {
    pub needs_financial_update: bool,
    pub needs_commission_update: bool,
    pub needs_earnings_creation: bool,
}

impl CascadeGates {
    pub fn evaluate(booking: &Booking, changes: &BookingChanges) -> Self {
        let needs_financial_update = FINANCIAL_FIELDS
            .iter()
            .any(|field| changes.contains(*field));
        let needs_commission_update = changes.custom_commission_changed
            || COMMISSION_FIELDS
                .iter()
                .any(|field| changes.contains(*field));

        // Edge-triggered when the previous status is known. Without it, any save
        // that carries `status` fires again; the earnings upsert absorbs repeats.
        let entered_completion = match changes.previous.status {
            Some(previous) => !previous.is_completed_like(),
            None => changes.contains(BookingField::Status),
        };
        let needs_earnings_creation = booking.status.is_completed_like() && entered_completion;

        Self {
            needs_financial_update,
            needs_commission_update,
            needs_earnings_creation,
        }
    }

    pub fn any(&self) -> bool {
        self.needs_financial_update || self.needs_commission_update || self.needs_earnings_creation
    }
}

/// Result of a best-effort or disabled step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    NotRequired,
    Applied,
    Skipped { reason: &'static str },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EarningsSummary {
    pub earning_id: Uuid,
    pub commission: ResolvedCommission,
    pub lesson_amount: LessonAmount,
    pub total_earnings: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EarningsOutcome {
    Created(EarningsSummary),
    Updated(EarningsSummary),
    /// No row yet and the lesson is worth nothing, so none is created.
    SkippedNonPositiveAmount,
    SkippedNoInstructor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BalanceOutcome {
    NotRequired,
    BelowThreshold {
        delta: Decimal,
    },
    Applied {
        delta: Decimal,
        balance_after: Decimal,
        ledger_entry_id: Uuid,
    },
}

/// Everything one cascade did, including best-effort steps that failed
/// without rolling anything back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CascadeReport {
    pub booking_id: Uuid,
    pub gates: CascadeGates,
    pub earnings: Option<EarningsOutcome>,
    pub revenue_snapshot: StepOutcome,
    pub balance: BalanceOutcome,
    pub package_audit: StepOutcome,
    pub analytics: StepOutcome,
}

impl CascadeReport {
    fn untouched(booking_id: Uuid, gates: CascadeGates) -> Self {
        Self {
            booking_id,
            gates,
            earnings: None,
            revenue_snapshot: StepOutcome::NotRequired,
            balance: BalanceOutcome::NotRequired,
            package_audit: StepOutcome::NotRequired,
            analytics: StepOutcome::NotRequired,
        }
    }

    pub fn best_effort_failures(&self) -> Vec<(&'static str, &str)> {
        [
            ("revenue_snapshot", &self.revenue_snapshot),
            ("package_audit", &self.package_audit),
            ("analytics", &self.analytics),
        ]
        .into_iter()
        .filter_map(|(step, outcome)| match outcome {
            StepOutcome::Failed { error } => Some((step, error.as_str())),
            _ => None,
        })
        .collect()
    }
}

/// Keeps earnings, balances and package usage in line with a booking.
pub struct BookingCascade<S, C>
where
    S: LedgerStore,
    C: AnalyticsCache,
{
    pub store: S,
    pub analytics: C,
}

impl<S, C> BookingCascade<S, C>
where
    S: LedgerStore,
    C: AnalyticsCache,
{
    pub fn new(store: S, analytics: C) -> Self {
        Self { store, analytics }
    }

    /// Applies the downstream effects of a booking mutation in one unit of work.
    ///
    /// Earnings upsert and balance adjustment must succeed or the whole unit is
    /// rolled back and the error returned. Revenue snapshots, package usage
    /// audit and analytics invalidation are best-effort and show up on the
    /// report.
    pub async fn cascade_booking_update(
        &self,
        booking: &Booking,
        changes: &BookingChanges,
    ) -> Result<CascadeReport, CascadeError> {
        let booking_id = booking.id;
        let gates = CascadeGates::evaluate(booking, changes);
        if !gates.any() {
            debug!(%booking_id, "booking change has no financial effect");
            return Ok(CascadeReport::untouched(booking_id, gates));
        }

        let mut session = self
            .store
            .begin()
            .await
            .map_err(|source| CascadeError::Begin { booking_id, source })?;

        let earnings = match upsert_instructor_earnings(session.as_mut(), booking).await {
            Ok(outcome) => outcome,
            Err(source) => {
                rollback(session, booking_id).await;
                return Err(CascadeError::EarningsUpsert { booking_id, source });
            }
        };

        let revenue_snapshot = update_revenue_snapshots(booking);

        let balance = match adjust_customer_balance(session.as_mut(), booking, changes).await {
            Ok(outcome) => outcome,
            Err(source) => {
                rollback(session, booking_id).await;
                return Err(CascadeError::BalanceAdjustment { booking_id, source });
            }
        };

        let package_audit = record_package_usage(session.as_mut(), booking, changes).await;

        session
            .commit()
            .await
            .map_err(|source| CascadeError::Commit { booking_id, source })?;

        let analytics = match self.analytics.invalidate_booking(booking).await {
            Ok(()) => StepOutcome::Applied,
            Err(err) => {
                warn!(%booking_id, "analytics cache invalidation failed: {err:#}");
                StepOutcome::Failed {
                    error: format!("{err:#}"),
                }
            }
        };

        info!(
            %booking_id,
            financial = gates.needs_financial_update,
            commission = gates.needs_commission_update,
            completion = gates.needs_earnings_creation,
            "booking cascade committed"
        );

        Ok(CascadeReport {
            booking_id,
            gates,
            earnings: Some(earnings),
            revenue_snapshot,
            balance,
            package_audit,
            analytics,
        })
    }

    pub async fn commission_rate(&self, booking: &Booking) -> anyhow::Result<ResolvedCommission> {
        let mut session = self.store.begin().await?;
        let resolved = resolve_commission(session.as_mut(), booking).await;
        session.rollback().await?;
        resolved
    }

    /// Fails open like `compute_lesson_amount`, including when no session can
    /// be opened.
    pub async fn lesson_amount(&self, booking: &Booking) -> LessonAmount {
        let mut session = match self.store.begin().await {
            Ok(session) => session,
            Err(err) => {
                warn!(
                    booking_id = %booking.id,
                    "no ledger session, keeping booking price: {err:#}"
                );
                return if booking.is_package_funded() {
                    LessonAmount::fallback(booking.base_amount())
                } else {
                    LessonAmount::direct(booking.base_amount())
                };
            }
        };

        let amount = compute_lesson_amount(session.as_mut(), booking).await;
        if let Err(err) = session.rollback().await {
            warn!(booking_id = %booking.id, "read-only session rollback failed: {err:#}");
        }
        amount
    }
}

async fn rollback(session: Box<dyn CascadeSession>, booking_id: Uuid) {
    if let Err(err) = session.rollback().await {
        error!(%booking_id, "cascade rollback failed: {err:#}");
    } else {
        error!(%booking_id, "booking cascade rolled back");
    }
}

async fn upsert_instructor_earnings(
    session: &mut dyn CascadeSession,
    booking: &Booking,
) -> anyhow::Result<EarningsOutcome> {
    let Some(instructor_id) = booking.instructor_id else {
        return Ok(EarningsOutcome::SkippedNoInstructor);
    };

    session.lock_booking(booking.id).await?;
    let existing = session.earning_for_update(booking.id).await?;

    let commission = resolve_commission(session, booking).await?;
    let lesson_amount = compute_lesson_amount(session, booking).await;
    let total_earnings = compute_instructor_earnings(
        &commission.rule.commission_type,
        commission.rule.commission_value,
        lesson_amount.value,
        booking.duration,
    );
    let commission_rate =
        commission_rate_fraction(&commission.rule, lesson_amount.value, total_earnings);
    let now = Utc::now();

    let summary = |earning_id| EarningsSummary {
        earning_id,
        commission: commission.clone(),
        lesson_amount,
        total_earnings,
    };
    let refresh = |row: &mut InstructorEarning| {
        row.instructor_id = instructor_id;
        row.commission_rate = commission_rate;
        row.total_earnings = total_earnings;
        row.lesson_amount = lesson_amount.value;
        row.lesson_duration = booking.duration;
        row.lesson_date = booking.date;
        row.currency = booking.currency.clone();
        row.updated_at = now;
    };

    if let Some(mut row) = existing {
        refresh(&mut row);
        session.update_earning(&row).await?;
        return Ok(EarningsOutcome::Updated(summary(row.id)));
    }

    if lesson_amount.value <= Decimal::ZERO {
        debug!(booking_id = %booking.id, "lesson amount not positive, no earnings row created");
        return Ok(EarningsOutcome::SkippedNonPositiveAmount);
    }

    let row = InstructorEarning {
        id: Uuid::new_v4(),
        booking_id: booking.id,
        instructor_id,
        commission_rate,
        total_earnings,
        lesson_amount: lesson_amount.value,
        lesson_duration: booking.duration,
        lesson_date: booking.date,
        currency: booking.currency.clone(),
        created_at: now,
        updated_at: now,
    };
    if session.insert_earning(&row).await? {
        return Ok(EarningsOutcome::Created(summary(row.id)));
    }

    // Lost the insert to a concurrent writer; take its row instead.
    let Some(mut current) = session.earning_for_update(booking.id).await? else {
        anyhow::bail!("earnings row for booking {} vanished after conflict", booking.id);
    };
    refresh(&mut current);
    session.update_earning(&current).await?;
    Ok(EarningsOutcome::Updated(summary(current.id)))
}

// TODO: revenue_snapshots keys bookings by integer id while bookings use UUIDs;
// write snapshots here once that table carries the booking UUID.
fn update_revenue_snapshots(_booking: &Booking) -> StepOutcome {
    StepOutcome::Skipped {
        reason: "schema_mismatch",
    }
}

async fn adjust_customer_balance(
    session: &mut dyn CascadeSession,
    booking: &Booking,
    changes: &BookingChanges,
) -> anyhow::Result<BalanceOutcome> {
    if !changes.price_changed() || booking.is_package_funded() {
        return Ok(BalanceOutcome::NotRequired);
    }

    let previous = changes.previous.base_amount();
    let current = booking.base_amount();
    let delta = round2(current - previous);
    if delta.abs() <= CENT {
        return Ok(BalanceOutcome::BelowThreshold { delta });
    }

    // A higher price is owed by the customer, so it comes off their balance.
    let balance_after = session
        .adjust_customer_balance(booking.student_id, -delta, &booking.currency)
        .await?;

    let now = Utc::now();
    let entry = LedgerEntry {
        id: Uuid::new_v4(),
        customer_id: booking.student_id,
        amount: Some(-delta),
        direction: None,
        transaction_type: (if delta > Decimal::ZERO { "charge" } else { "credit" }).to_string(),
        currency: booking.currency.clone(),
        status: Some("completed".to_string()),
        description: Some(format!("Booking price adjusted from {previous} to {current}")),
        booking_id: Some(booking.id),
        rental_id: None,
        transaction_date: Some(now),
        created_at: Some(now),
    };
    session.append_ledger_entry(&entry).await?;

    Ok(BalanceOutcome::Applied {
        delta,
        balance_after,
        ledger_entry_id: entry.id,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use lessonbook_core::{BookingStatus, PaymentStatus, PreviousValues};

    use super::*;

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            instructor_id: Some(Uuid::new_v4()),
            service_id: Some(Uuid::new_v4()),
            final_amount: Some(Decimal::from(100)),
            amount: None,
            duration: Decimal::ONE,
            status,
            payment_status: PaymentStatus::Individual,
            customer_package_id: None,
            currency: "EUR".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        }
    }

    fn previous_status(status: BookingStatus) -> PreviousValues {
        PreviousValues {
            status: Some(status),
            ..PreviousValues::default()
        }
    }

    #[test]
    fn completion_alone_opens_the_cascade() {
        let changes = BookingChanges::new(
            [BookingField::Status],
            previous_status(BookingStatus::Confirmed),
        );
        let gates = CascadeGates::evaluate(&booking(BookingStatus::Completed), &changes);

        assert!(gates.needs_earnings_creation);
        assert!(!gates.needs_financial_update);
        assert!(!gates.needs_commission_update);
        assert!(gates.any());
    }

    #[test]
    fn resaving_completed_does_not_refire() {
        let changes =
            BookingChanges::new([BookingField::Status], previous_status(BookingStatus::Done));
        let gates = CascadeGates::evaluate(&booking(BookingStatus::Completed), &changes);
        assert!(!gates.any());
    }

    #[test]
    fn unknown_previous_status_fires_on_every_status_save() {
        let completed = booking(BookingStatus::Completed);
        let status_saved = BookingChanges::new([BookingField::Status], PreviousValues::default());

        let first = CascadeGates::evaluate(&completed, &status_saved);
        let again = CascadeGates::evaluate(&completed, &status_saved);
        assert!(first.needs_earnings_creation);
        assert!(again.needs_earnings_creation);

        let price_only = BookingChanges::new([BookingField::FinalAmount], PreviousValues::default());
        assert!(!CascadeGates::evaluate(&completed, &price_only).needs_earnings_creation);
    }

    #[test]
    fn instructor_change_sets_both_financial_and_commission() {
        let changes = BookingChanges::new([BookingField::InstructorId], PreviousValues::default());
        let gates = CascadeGates::evaluate(&booking(BookingStatus::Confirmed), &changes);
        assert!(gates.needs_financial_update);
        assert!(gates.needs_commission_update);
        assert!(!gates.needs_earnings_creation);
    }

    #[test]
    fn custom_commission_flag_alone_is_enough() {
        let changes = BookingChanges::default().with_custom_commission_changed();
        let gates = CascadeGates::evaluate(&booking(BookingStatus::Confirmed), &changes);
        assert!(gates.needs_commission_update);
    }

    #[test]
    fn unrelated_change_is_ignored() {
        let changes = BookingChanges::new([BookingField::Date], PreviousValues::default());
        assert!(!CascadeGates::evaluate(&booking(BookingStatus::Pending), &changes).any());
    }

    #[test]
    fn report_lists_only_failed_best_effort_steps() {
        let mut report = CascadeReport::untouched(Uuid::new_v4(), CascadeGates::default());
        report.package_audit = StepOutcome::Failed {
            error: "audit table missing".to_string(),
        };
        report.revenue_snapshot = StepOutcome::Skipped {
            reason: "schema_mismatch",
        };

        assert_eq!(
            report.best_effort_failures(),
            vec![("package_audit", "audit table missing")]
        );
    }
}
