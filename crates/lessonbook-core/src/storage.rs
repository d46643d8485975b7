use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::commission::CommissionRule;
use crate::models::{
    AccountSnapshot, Booking, CustomerPackage, InstructorEarning, LedgerEntry,
    PackageUsageAudit, ServicePackage,
};

/// Opens exclusive units of work against the booking ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> anyhow::Result<Box<dyn CascadeSession>>;
}

/// One transactional session. Dropping it without `commit` discards every
/// write made through it.
#[async_trait]
pub trait CascadeSession: Send {
    /// Serialises cascades for the same booking until the session ends.
    async fn lock_booking(&mut self, booking_id: Uuid) -> anyhow::Result<()>;

    async fn booking_commission(
        &mut self,
        booking_id: Uuid,
    ) -> anyhow::Result<Option<CommissionRule>>;

    async fn instructor_service_commission(
        &mut self,
        instructor_id: Uuid,
        service_id: Uuid,
    ) -> anyhow::Result<Option<CommissionRule>>;

    async fn instructor_default_commission(
        &mut self,
        instructor_id: Uuid,
    ) -> anyhow::Result<Option<CommissionRule>>;

    async fn customer_package(
        &mut self,
        package_id: Uuid,
    ) -> anyhow::Result<Option<CustomerPackage>>;

    async fn service_package(
        &mut self,
        package_id: Uuid,
    ) -> anyhow::Result<Option<ServicePackage>>;

    /// Reads the earnings row and holds it until the session ends.
    async fn earning_for_update(
        &mut self,
        booking_id: Uuid,
    ) -> anyhow::Result<Option<InstructorEarning>>;

    /// Returns `false` when a row for the booking already exists.
    async fn insert_earning(&mut self, earning: &InstructorEarning) -> anyhow::Result<bool>;

    async fn update_earning(&mut self, earning: &InstructorEarning) -> anyhow::Result<()>;

    async fn adjust_customer_balance(
        &mut self,
        customer_id: Uuid,
        delta: Decimal,
        currency: &str,
    ) -> anyhow::Result<Decimal>;

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> anyhow::Result<()>;

    /// Must not poison the session when it fails.
    async fn append_package_usage(&mut self, audit: &PackageUsageAudit) -> anyhow::Result<()>;

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;

    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}

/// Read side used by the account overview and the snapshot repair job.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn ledger_entries(&self, customer_id: Uuid) -> anyhow::Result<Vec<LedgerEntry>>;

    async fn account_snapshot(&self, customer_id: Uuid) -> anyhow::Result<Option<AccountSnapshot>>;

    async fn latest_succeeded_payment_at(
        &self,
        customer_id: Uuid,
    ) -> anyhow::Result<Option<DateTime<Utc>>>;

    async fn upsert_account_snapshot(&self, snapshot: &AccountSnapshot) -> anyhow::Result<()>;

    async fn customer_ids(&self) -> anyhow::Result<Vec<Uuid>>;
}

#[async_trait]
pub trait AnalyticsCache: Send + Sync {
    async fn invalidate_booking(&self, booking: &Booking) -> anyhow::Result<()>;
}

/// An absent cache has nothing to invalidate.
#[async_trait]
impl<C: AnalyticsCache> AnalyticsCache for Option<C> {
    async fn invalidate_booking(&self, booking: &Booking) -> anyhow::Result<()> {
        match self {
            Some(cache) => cache.invalidate_booking(booking).await,
            None => Ok(()),
        }
    }
}
