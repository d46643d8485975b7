pub mod audit;
pub mod cascade;
pub mod commission;
pub mod error;
pub mod lesson;
pub mod overview;

pub use cascade::{
    BalanceOutcome, BookingCascade, CascadeGates, CascadeReport, EarningsOutcome,
    EarningsSummary, StepOutcome,
};
pub use commission::resolve_commission;
pub use error::CascadeError;
pub use lesson::compute_lesson_amount;
pub use lessonbook_finance::{compute_instructor_earnings, compute_transaction_aggregates};
pub use overview::{account_overview, repair_account_snapshot};
