use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lessonbook_core::{
    AccountSnapshot, AccountStore, AnalyticsCache, Booking, CascadeSession, CommissionRule,
    CustomerPackage, InstructorEarning, LedgerEntry, LedgerStore, PackageUsageAudit,
    ServicePackage,
};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PaymentIntentRecord {
    pub customer_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    pub booking_commissions: HashMap<Uuid, CommissionRule>,
    pub instructor_service_commissions: HashMap<(Uuid, Uuid), CommissionRule>,
    pub instructor_default_commissions: HashMap<Uuid, CommissionRule>,
    pub customer_packages: HashMap<Uuid, CustomerPackage>,
    pub service_packages: HashMap<Uuid, ServicePackage>,
    /// Keyed by booking id.
    pub earnings: HashMap<Uuid, InstructorEarning>,
    pub balances: HashMap<Uuid, Decimal>,
    pub ledger: Vec<LedgerEntry>,
    pub package_usage: Vec<PackageUsageAudit>,
    pub snapshots: HashMap<Uuid, AccountSnapshot>,
    pub payment_intents: Vec<PaymentIntentRecord>,
}

/// Operations that can be made to fail, to exercise rollback paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Begin,
    CommissionLookup,
    PackageLookup,
    InsertEarning,
    UpdateEarning,
    AdjustBalance,
    AppendLedger,
    PackageUsage,
    Commit,
}

/// Ledger held in memory. A session works on a private copy of the state and
/// holds the store lock until it ends, so sessions are fully serialised and a
/// dropped session leaves no trace.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    failures: Arc<RwLock<HashSet<FailurePoint>>>,
    /// Rows another writer lands between a session's read and its insert.
    concurrent_inserts: Arc<RwLock<HashMap<Uuid, InstructorEarning>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed<F>(&self, apply: F)
    where
        F: FnOnce(&mut LedgerState),
    {
        let mut state = self.state.lock().await;
        apply(&mut state);
    }

    pub async fn snapshot(&self) -> LedgerState {
        self.state.lock().await.clone()
    }

    pub async fn fail_at(&self, point: FailurePoint) {
        self.failures.write().await.insert(point);
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// The next earnings insert for this booking loses to `winner`: the row
    /// appears and the insert reports a conflict.
    pub async fn race_earning_insert(&self, winner: InstructorEarning) {
        self.concurrent_inserts
            .write()
            .await
            .insert(winner.booking_id, winner);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn CascadeSession>> {
        let failures = self.failures.read().await.clone();
        if failures.contains(&FailurePoint::Begin) {
            bail!("injected failure: begin");
        }

        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemorySession {
            guard,
            working,
            failures,
            concurrent_inserts: self.concurrent_inserts.clone(),
        }))
    }
}

pub struct InMemorySession {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
    failures: HashSet<FailurePoint>,
    concurrent_inserts: Arc<RwLock<HashMap<Uuid, InstructorEarning>>>,
}

impl InMemorySession {
    fn check(&self, point: FailurePoint) -> anyhow::Result<()> {
        if self.failures.contains(&point) {
            bail!("injected failure: {point:?}");
        }
        Ok(())
    }
}

#[async_trait]
impl CascadeSession for InMemorySession {
    async fn lock_booking(&mut self, _booking_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    async fn booking_commission(
        &mut self,
        booking_id: Uuid,
    ) -> anyhow::Result<Option<CommissionRule>> {
        self.check(FailurePoint::CommissionLookup)?;
        Ok(self.working.booking_commissions.get(&booking_id).cloned())
    }

    async fn instructor_service_commission(
        &mut self,
        instructor_id: Uuid,
        service_id: Uuid,
    ) -> anyhow::Result<Option<CommissionRule>> {
        self.check(FailurePoint::CommissionLookup)?;
        Ok(self
            .working
            .instructor_service_commissions
            .get(&(instructor_id, service_id))
            .cloned())
    }

    async fn instructor_default_commission(
        &mut self,
        instructor_id: Uuid,
    ) -> anyhow::Result<Option<CommissionRule>> {
        self.check(FailurePoint::CommissionLookup)?;
        Ok(self
            .working
            .instructor_default_commissions
            .get(&instructor_id)
            .cloned())
    }

    async fn customer_package(
        &mut self,
        package_id: Uuid,
    ) -> anyhow::Result<Option<CustomerPackage>> {
        self.check(FailurePoint::PackageLookup)?;
        Ok(self.working.customer_packages.get(&package_id).cloned())
    }

    async fn service_package(
        &mut self,
        package_id: Uuid,
    ) -> anyhow::Result<Option<ServicePackage>> {
        self.check(FailurePoint::PackageLookup)?;
        Ok(self.working.service_packages.get(&package_id).cloned())
    }

    async fn earning_for_update(
        &mut self,
        booking_id: Uuid,
    ) -> anyhow::Result<Option<InstructorEarning>> {
        Ok(self.working.earnings.get(&booking_id).cloned())
    }

    async fn insert_earning(&mut self, earning: &InstructorEarning) -> anyhow::Result<bool> {
        self.check(FailurePoint::InsertEarning)?;
        let winner = self
            .concurrent_inserts
            .write()
            .await
            .remove(&earning.booking_id);
        if let Some(winner) = winner {
            self.working.earnings.insert(winner.booking_id, winner);
            return Ok(false);
        }
        if self.working.earnings.contains_key(&earning.booking_id) {
            return Ok(false);
        }
        self.working
            .earnings
            .insert(earning.booking_id, earning.clone());
        Ok(true)
    }

    async fn update_earning(&mut self, earning: &InstructorEarning) -> anyhow::Result<()> {
        self.check(FailurePoint::UpdateEarning)?;
        let Some(row) = self.working.earnings.get_mut(&earning.booking_id) else {
            bail!("no earnings row for booking {}", earning.booking_id);
        };
        *row = earning.clone();
        Ok(())
    }

    async fn adjust_customer_balance(
        &mut self,
        customer_id: Uuid,
        delta: Decimal,
        _currency: &str,
    ) -> anyhow::Result<Decimal> {
        self.check(FailurePoint::AdjustBalance)?;
        let balance = self.working.balances.entry(customer_id).or_default();
        *balance += delta;
        Ok(*balance)
    }

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> anyhow::Result<()> {
        self.check(FailurePoint::AppendLedger)?;
        self.working.ledger.push(entry.clone());
        Ok(())
    }

    async fn append_package_usage(&mut self, audit: &PackageUsageAudit) -> anyhow::Result<()> {
        self.check(FailurePoint::PackageUsage)?;
        self.working.package_usage.push(audit.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.check(FailurePoint::Commit)?;
        let InMemorySession {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl AccountStore for InMemoryLedgerStore {
    async fn ledger_entries(&self, customer_id: Uuid) -> anyhow::Result<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .filter(|entry| entry.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn account_snapshot(&self, customer_id: Uuid) -> anyhow::Result<Option<AccountSnapshot>> {
        let state = self.state.lock().await;
        Ok(state.snapshots.get(&customer_id).cloned())
    }

    async fn latest_succeeded_payment_at(
        &self,
        customer_id: Uuid,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        Ok(state
            .payment_intents
            .iter()
            .filter(|intent| intent.customer_id == customer_id && intent.status == "succeeded")
            .map(|intent| intent.created_at)
            .max())
    }

    async fn upsert_account_snapshot(&self, snapshot: &AccountSnapshot) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state
            .snapshots
            .insert(snapshot.customer_id, snapshot.clone());
        Ok(())
    }

    async fn customer_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        let state = self.state.lock().await;
        let ids: BTreeSet<Uuid> = state
            .ledger
            .iter()
            .map(|entry| entry.customer_id)
            .chain(state.snapshots.keys().copied())
            .collect();
        Ok(ids.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalyticsCache;

#[async_trait]
impl AnalyticsCache for NoopAnalyticsCache {
    async fn invalidate_booking(&self, _booking: &Booking) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;

    fn earning(booking_id: Uuid, total: i64) -> InstructorEarning {
        InstructorEarning {
            id: Uuid::new_v4(),
            booking_id,
            instructor_id: Uuid::new_v4(),
            commission_rate: Decimal::new(5, 1),
            total_earnings: Decimal::from(total),
            lesson_amount: Decimal::from(total * 2),
            lesson_duration: Decimal::ONE,
            lesson_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            currency: "EUR".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = InMemoryLedgerStore::new();
        let booking_id = Uuid::new_v4();

        let mut session = store.begin().await.unwrap();
        assert!(session.insert_earning(&earning(booking_id, 40)).await.unwrap());
        assert!(!session.insert_earning(&earning(booking_id, 45)).await.unwrap());
        session.commit().await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.earnings.len(), 1);
        assert_eq!(state.earnings[&booking_id].total_earnings, Decimal::from(40));
    }

    #[tokio::test]
    async fn dropped_session_discards_writes() {
        let store = InMemoryLedgerStore::new();
        let customer_id = Uuid::new_v4();

        {
            let mut session = store.begin().await.unwrap();
            session
                .adjust_customer_balance(customer_id, Decimal::from(-20), "EUR")
                .await
                .unwrap();
        }

        let mut session = store.begin().await.unwrap();
        session.insert_earning(&earning(Uuid::new_v4(), 10)).await.unwrap();
        session.rollback().await.unwrap();

        let state = store.snapshot().await;
        assert!(state.balances.is_empty());
        assert!(state.earnings.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let store = InMemoryLedgerStore::new();
        store.fail_at(FailurePoint::PackageUsage).await;

        let mut session = store.begin().await.unwrap();
        let audit = PackageUsageAudit {
            id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            customer_package_id: None,
            old_amount: Decimal::ZERO,
            new_amount: Decimal::ONE,
            package_name: None,
            created_at: Utc::now(),
        };
        assert!(session.append_package_usage(&audit).await.is_err());
        session.commit().await.unwrap();

        store.clear_failures().await;
        assert!(store.snapshot().await.package_usage.is_empty());
    }
}
