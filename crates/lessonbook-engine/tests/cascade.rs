use std::str::FromStr;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use lessonbook_core::{
    AnalyticsCache, Booking, BookingChanges, BookingField, BookingStatus, CommissionRule,
    CommissionSource, CommissionType, CustomerPackage, InstructorEarning, PaymentStatus,
    PreviousValues, ServicePackage,
};
use lessonbook_engine::{
    BalanceOutcome, BookingCascade, CascadeError, EarningsOutcome, StepOutcome,
};
use lessonbook_finance::AmountBasis;
use lessonbook_store::{FailurePoint, InMemoryLedgerStore, NoopAnalyticsCache};
use rust_decimal::Decimal;
use uuid::Uuid;

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

fn lesson(status: BookingStatus, final_amount: Option<&str>) -> Booking {
    Booking {
        id: Uuid::new_v4(),
        student_id: Uuid::new_v4(),
        instructor_id: Some(Uuid::new_v4()),
        service_id: Some(Uuid::new_v4()),
        final_amount: final_amount.map(dec),
        amount: None,
        duration: Decimal::ONE,
        status,
        payment_status: PaymentStatus::Individual,
        customer_package_id: None,
        currency: "EUR".to_string(),
        date: NaiveDate::from_ymd_opt(2026, 9, 12).unwrap(),
    }
}

fn package_lesson(package_id: Uuid, duration: &str, final_amount: &str) -> Booking {
    Booking {
        payment_status: PaymentStatus::Package,
        customer_package_id: Some(package_id),
        duration: dec(duration),
        ..lesson(BookingStatus::Completed, Some(final_amount))
    }
}

fn completed_from_confirmed() -> BookingChanges {
    BookingChanges::new(
        [BookingField::Status],
        PreviousValues {
            status: Some(BookingStatus::Confirmed),
            ..PreviousValues::default()
        },
    )
}

fn price_change(previous: &str) -> BookingChanges {
    BookingChanges::new(
        [BookingField::FinalAmount],
        PreviousValues {
            final_amount: Some(dec(previous)),
            ..PreviousValues::default()
        },
    )
}

fn customer_package(id: Uuid, price: &str, total_hours: Option<&str>) -> CustomerPackage {
    CustomerPackage {
        id,
        customer_id: Uuid::new_v4(),
        service_package_id: None,
        package_name: Some("Ten hour kite course".to_string()),
        purchase_price: Some(dec(price)),
        total_hours: total_hours.map(dec),
        used_hours: None,
        remaining_hours: None,
    }
}

fn cascade(
    store: &InMemoryLedgerStore,
) -> BookingCascade<InMemoryLedgerStore, NoopAnalyticsCache> {
    BookingCascade::new(store.clone(), NoopAnalyticsCache)
}

struct FailingAnalytics;

#[async_trait]
impl AnalyticsCache for FailingAnalytics {
    async fn invalidate_booking(&self, _booking: &Booking) -> anyhow::Result<()> {
        anyhow::bail!("analytics cache unreachable")
    }
}

#[tokio::test]
async fn individual_lesson_completion_creates_earnings() {
    let store = InMemoryLedgerStore::new();
    let booking = lesson(BookingStatus::Completed, Some("100"));
    let instructor_id = booking.instructor_id.unwrap();
    store
        .seed(|state| {
            state.instructor_default_commissions.insert(
                instructor_id,
                CommissionRule::new(CommissionType::Percentage, dec("70")),
            );
        })
        .await;

    let report = cascade(&store)
        .cascade_booking_update(&booking, &completed_from_confirmed())
        .await
        .unwrap();

    assert!(report.gates.needs_earnings_creation);
    assert!(!report.gates.needs_financial_update);
    let Some(EarningsOutcome::Created(summary)) = report.earnings else {
        panic!("expected earnings to be created");
    };
    assert_eq!(summary.lesson_amount.value, dec("100"));
    assert_eq!(summary.total_earnings, dec("70"));
    assert_eq!(summary.commission.source, CommissionSource::InstructorDefault);

    let state = store.snapshot().await;
    let row = &state.earnings[&booking.id];
    assert_eq!(row.total_earnings, dec("70"));
    assert_eq!(row.commission_rate, dec("0.7"));
    assert_eq!(row.lesson_date, booking.date);
    assert_eq!(report.revenue_snapshot, StepOutcome::Skipped { reason: "schema_mismatch" });
    assert_eq!(report.balance, BalanceOutcome::NotRequired);
    assert_eq!(report.analytics, StepOutcome::Applied);
}

#[tokio::test]
async fn package_lesson_is_priced_from_the_package() {
    let store = InMemoryLedgerStore::new();
    let package_id = Uuid::new_v4();
    store
        .seed(|state| {
            state
                .customer_packages
                .insert(package_id, customer_package(package_id, "500", Some("10")));
        })
        .await;
    let booking = package_lesson(package_id, "2", "999");

    let amount = cascade(&store).lesson_amount(&booking).await;
    assert_eq!(amount.value, dec("100"));
    assert_eq!(amount.basis, AmountBasis::PackageHours);

    let report = cascade(&store)
        .cascade_booking_update(&booking, &completed_from_confirmed())
        .await
        .unwrap();
    let Some(EarningsOutcome::Created(summary)) = report.earnings else {
        panic!("expected earnings to be created");
    };
    assert_eq!(summary.commission.source, CommissionSource::Fallback);
    assert_eq!(summary.total_earnings, dec("50"));
    assert!(store.snapshot().await.ledger.is_empty());
}

#[tokio::test]
async fn package_template_supplies_missing_hours() {
    let store = InMemoryLedgerStore::new();
    let package_id = Uuid::new_v4();
    let template_id = Uuid::new_v4();
    store
        .seed(|state| {
            let mut package = customer_package(package_id, "360", None);
            package.service_package_id = Some(template_id);
            state.customer_packages.insert(package_id, package);
            state.service_packages.insert(
                template_id,
                ServicePackage {
                    id: template_id,
                    name: "Six lessons".to_string(),
                    total_hours: None,
                    sessions_count: Some(6),
                    duration_hours: Some(dec("1.5")),
                },
            );
        })
        .await;

    let amount = cascade(&store)
        .lesson_amount(&package_lesson(package_id, "1.5", "0"))
        .await;
    assert_eq!(amount.value, dec("60"));
}

#[tokio::test]
async fn package_lookup_failure_falls_back_to_booking_price() {
    let store = InMemoryLedgerStore::new();
    let missing = package_lesson(Uuid::new_v4(), "2", "80");

    let amount = cascade(&store).lesson_amount(&missing).await;
    assert_eq!(amount.value, dec("80"));
    assert_eq!(amount.basis, AmountBasis::BaseFallback);

    let package_id = Uuid::new_v4();
    store
        .seed(|state| {
            state
                .customer_packages
                .insert(package_id, customer_package(package_id, "500", Some("10")));
        })
        .await;
    store.fail_at(FailurePoint::PackageLookup).await;
    let booking = package_lesson(package_id, "2", "80");

    // The failed lookup does not abort the cascade; earnings use the raw price.
    let report = cascade(&store)
        .cascade_booking_update(&booking, &completed_from_confirmed())
        .await
        .unwrap();
    let Some(EarningsOutcome::Created(summary)) = report.earnings else {
        panic!("expected earnings to be created");
    };
    assert_eq!(summary.lesson_amount.value, dec("80"));
    assert_eq!(summary.lesson_amount.basis, AmountBasis::BaseFallback);
    assert_eq!(store.snapshot().await.earnings.len(), 1);
}

#[tokio::test]
async fn base_amount_fallbacks_for_individual_lessons() {
    let store = InMemoryLedgerStore::new();
    let engine = cascade(&store);

    let priced = lesson(BookingStatus::Confirmed, Some("120"));
    assert_eq!(engine.lesson_amount(&priced).await.value, dec("120"));

    let mut from_amount = lesson(BookingStatus::Confirmed, Some("0"));
    from_amount.amount = Some(dec("90"));
    assert_eq!(engine.lesson_amount(&from_amount).await.value, dec("90"));

    let unpriced = lesson(BookingStatus::Confirmed, None);
    assert_eq!(engine.lesson_amount(&unpriced).await.value, Decimal::ZERO);
}

#[tokio::test]
async fn booking_override_beats_service_and_default_rules() {
    let store = InMemoryLedgerStore::new();
    let booking = lesson(BookingStatus::Completed, Some("100"));
    let instructor_id = booking.instructor_id.unwrap();
    let service_id = booking.service_id.unwrap();
    store
        .seed(|state| {
            state.booking_commissions.insert(
                booking.id,
                CommissionRule::new(CommissionType::FixedPerLesson, dec("30")),
            );
            state.instructor_service_commissions.insert(
                (instructor_id, service_id),
                CommissionRule::new(CommissionType::Percentage, dec("60")),
            );
            state.instructor_default_commissions.insert(
                instructor_id,
                CommissionRule::new(CommissionType::FixedPerHour, dec("25")),
            );
        })
        .await;

    let engine = cascade(&store);
    let resolved = engine.commission_rate(&booking).await.unwrap();
    assert_eq!(resolved.source, CommissionSource::BookingOverride);
    assert_eq!(resolved.rule.commission_value, dec("30"));

    store
        .seed(|state| {
            state.booking_commissions.clear();
        })
        .await;
    let resolved = engine.commission_rate(&booking).await.unwrap();
    assert_eq!(resolved.source, CommissionSource::InstructorService);
}

#[tokio::test]
async fn repeated_cascades_keep_one_earnings_row() {
    let store = InMemoryLedgerStore::new();
    let engine = cascade(&store);
    let mut booking = lesson(BookingStatus::Completed, Some("100"));

    engine
        .cascade_booking_update(&booking, &completed_from_confirmed())
        .await
        .unwrap();
    let second = engine
        .cascade_booking_update(&booking, &completed_from_confirmed())
        .await
        .unwrap();
    assert!(matches!(second.earnings, Some(EarningsOutcome::Updated(_))));

    booking.final_amount = Some(dec("140"));
    booking.duration = dec("1.5");
    let mut changes = price_change("100");
    changes.fields.insert(BookingField::Duration);
    engine.cascade_booking_update(&booking, &changes).await.unwrap();

    let state = store.snapshot().await;
    assert_eq!(state.earnings.len(), 1);
    let row = &state.earnings[&booking.id];
    assert_eq!(row.lesson_amount, dec("140"));
    assert_eq!(row.total_earnings, dec("70"));
    assert_eq!(row.lesson_duration, dec("1.5"));
}

#[tokio::test]
async fn lost_insert_race_updates_the_winning_row() {
    let store = InMemoryLedgerStore::new();
    let booking = lesson(BookingStatus::Completed, Some("100"));
    let winner = InstructorEarning {
        id: Uuid::new_v4(),
        booking_id: booking.id,
        instructor_id: booking.instructor_id.unwrap(),
        commission_rate: dec("0.3"),
        total_earnings: dec("30"),
        lesson_amount: dec("100"),
        lesson_duration: Decimal::ONE,
        lesson_date: booking.date,
        currency: "EUR".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.race_earning_insert(winner.clone()).await;

    let report = cascade(&store)
        .cascade_booking_update(&booking, &completed_from_confirmed())
        .await
        .unwrap();

    let Some(EarningsOutcome::Updated(summary)) = report.earnings else {
        panic!("expected the concurrent row to be updated");
    };
    assert_eq!(summary.earning_id, winner.id);
    assert_eq!(summary.total_earnings, dec("50"));

    let state = store.snapshot().await;
    assert_eq!(state.earnings.len(), 1);
    let row = &state.earnings[&booking.id];
    assert_eq!(row.id, winner.id);
    assert_eq!(row.total_earnings, dec("50"));
    assert_eq!(row.commission_rate, dec("0.5"));
    assert_eq!(row.created_at, winner.created_at);
}

#[tokio::test]
async fn price_changes_move_the_customer_balance() {
    let store = InMemoryLedgerStore::new();
    let engine = cascade(&store);
    let mut booking = lesson(BookingStatus::Confirmed, Some("120"));

    let report = engine
        .cascade_booking_update(&booking, &price_change("100"))
        .await
        .unwrap();
    let BalanceOutcome::Applied {
        delta,
        balance_after,
        ..
    } = report.balance
    else {
        panic!("expected a balance adjustment");
    };
    assert_eq!(delta, dec("20"));
    assert_eq!(balance_after, dec("-20"));

    booking.final_amount = Some(dec("100"));
    engine
        .cascade_booking_update(&booking, &price_change("120"))
        .await
        .unwrap();

    let state = store.snapshot().await;
    assert_eq!(state.balances[&booking.student_id], Decimal::ZERO);
    assert_eq!(state.ledger.len(), 2);
    assert_eq!(state.ledger[0].transaction_type, "charge");
    assert_eq!(state.ledger[0].amount, Some(dec("-20")));
    assert_eq!(state.ledger[1].transaction_type, "credit");
    assert_eq!(state.ledger[1].amount, Some(dec("20")));
    assert_eq!(state.ledger[1].booking_id, Some(booking.id));
}

#[tokio::test]
async fn cent_sized_price_change_is_not_booked() {
    let store = InMemoryLedgerStore::new();
    let booking = lesson(BookingStatus::Confirmed, Some("100.01"));

    let report = cascade(&store)
        .cascade_booking_update(&booking, &price_change("100"))
        .await
        .unwrap();

    assert!(matches!(report.balance, BalanceOutcome::BelowThreshold { .. }));
    assert!(store.snapshot().await.ledger.is_empty());
}

#[tokio::test]
async fn balance_failure_rolls_back_earnings() {
    let store = InMemoryLedgerStore::new();
    store.fail_at(FailurePoint::AdjustBalance).await;
    let booking = lesson(BookingStatus::Completed, Some("150"));

    let err = cascade(&store)
        .cascade_booking_update(&booking, &price_change("100"))
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::BalanceAdjustment { .. }));
    assert_eq!(err.booking_id(), booking.id);
    let state = store.snapshot().await;
    assert!(state.earnings.is_empty());
    assert!(state.ledger.is_empty());
}

#[tokio::test]
async fn earnings_failure_aborts_before_balance() {
    let store = InMemoryLedgerStore::new();
    store.fail_at(FailurePoint::InsertEarning).await;
    let booking = lesson(BookingStatus::Confirmed, Some("150"));

    let err = cascade(&store)
        .cascade_booking_update(&booking, &price_change("100"))
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::EarningsUpsert { .. }));
    let state = store.snapshot().await;
    assert!(state.balances.is_empty());
    assert!(state.ledger.is_empty());
}

#[tokio::test]
async fn package_price_change_writes_audit_not_balance() {
    let store = InMemoryLedgerStore::new();
    let package_id = Uuid::new_v4();
    store
        .seed(|state| {
            state
                .customer_packages
                .insert(package_id, customer_package(package_id, "500", Some("10")));
        })
        .await;
    let booking = package_lesson(package_id, "1", "65");

    let report = cascade(&store)
        .cascade_booking_update(&booking, &price_change("50"))
        .await
        .unwrap();

    assert_eq!(report.balance, BalanceOutcome::NotRequired);
    assert_eq!(report.package_audit, StepOutcome::Applied);
    let state = store.snapshot().await;
    assert!(state.ledger.is_empty());
    assert_eq!(state.package_usage.len(), 1);
    let audit = &state.package_usage[0];
    assert_eq!(audit.old_amount, dec("50"));
    assert_eq!(audit.new_amount, dec("65"));
    assert_eq!(audit.package_name.as_deref(), Some("Ten hour kite course"));
    assert_eq!(state.customer_packages[&package_id].remaining_hours, None);
}

#[tokio::test]
async fn best_effort_failures_are_reported_not_raised() {
    let store = InMemoryLedgerStore::new();
    store.fail_at(FailurePoint::PackageUsage).await;
    let package_id = Uuid::new_v4();
    store
        .seed(|state| {
            state
                .customer_packages
                .insert(package_id, customer_package(package_id, "500", Some("10")));
        })
        .await;
    let booking = package_lesson(package_id, "1", "65");

    let engine = BookingCascade::new(store.clone(), FailingAnalytics);
    let report = engine
        .cascade_booking_update(&booking, &price_change("50"))
        .await
        .unwrap();

    assert!(matches!(report.package_audit, StepOutcome::Failed { .. }));
    assert!(matches!(report.analytics, StepOutcome::Failed { .. }));
    assert_eq!(report.best_effort_failures().len(), 2);

    let state = store.snapshot().await;
    assert_eq!(state.earnings.len(), 1);
    assert!(state.package_usage.is_empty());
}

#[tokio::test]
async fn worthless_lesson_creates_no_earnings_row() {
    let store = InMemoryLedgerStore::new();
    let booking = lesson(BookingStatus::Completed, None);

    let report = cascade(&store)
        .cascade_booking_update(&booking, &completed_from_confirmed())
        .await
        .unwrap();

    assert_eq!(report.earnings, Some(EarningsOutcome::SkippedNonPositiveAmount));
    assert!(store.snapshot().await.earnings.is_empty());
}

#[tokio::test]
async fn change_without_financial_effect_opens_no_session() {
    let store = InMemoryLedgerStore::new();
    store.fail_at(FailurePoint::Begin).await;
    let booking = lesson(BookingStatus::Confirmed, Some("100"));
    let changes = BookingChanges::new([BookingField::Date], PreviousValues::default());

    let report = cascade(&store)
        .cascade_booking_update(&booking, &changes)
        .await
        .unwrap();

    assert!(!report.gates.any());
    assert_eq!(report.earnings, None);
}

#[tokio::test]
async fn commit_failure_is_returned_and_nothing_persists() {
    let store = InMemoryLedgerStore::new();
    store.fail_at(FailurePoint::Commit).await;
    let booking = lesson(BookingStatus::Completed, Some("100"));

    let err = cascade(&store)
        .cascade_booking_update(&booking, &completed_from_confirmed())
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::Commit { .. }));
    assert!(store.snapshot().await.earnings.is_empty());
}
