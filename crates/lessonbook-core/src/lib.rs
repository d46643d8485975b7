pub mod changes;
pub mod commission;
pub mod models;
pub mod storage;

pub use changes::{BookingChanges, BookingField, PreviousValues};
pub use commission::{CommissionRule, CommissionSource, CommissionType, ResolvedCommission};
pub use models::{
    AccountSnapshot, Booking, BookingStatus, CustomerPackage, Direction, InstructorEarning,
    LedgerEntry, PackageUsageAudit, PaymentStatus, ServicePackage,
};
pub use storage::{AccountStore, AnalyticsCache, CascadeSession, LedgerStore};
