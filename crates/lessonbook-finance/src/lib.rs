pub mod commission;
pub mod lesson;
pub mod ledger;
pub mod money;
pub mod reconcile;

pub use commission::{commission_rate_fraction, compute_instructor_earnings, first_matching_rule};
pub use lesson::{AmountBasis, LessonAmount, LessonAmountInputs, derive_lesson_amount};
pub use ledger::{
    CHARGE_TYPES, LedgerClass, PAYMENT_TYPES, REFUND_TYPES, TransactionAggregates,
    classify_transaction, compute_transaction_aggregates, normalize_raw_entries,
    normalize_raw_entry, parse_timestamp,
};
pub use money::{CENT, round2};
pub use reconcile::{AccountOverview, OverviewSource, SnapshotDrift, reconcile_snapshot};
