use chrono::{DateTime, Utc};
use lessonbook_core::AccountSnapshot;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::ledger::TransactionAggregates;
use crate::money::exceeds_cent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverviewSource {
    Snapshot,
    Ledger,
}

/// Cached minus computed, for a snapshot that disagreed with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SnapshotDrift {
    pub balance: Decimal,
    pub total_spent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountOverview {
    pub customer_id: Uuid,
    pub balance: Decimal,
    pub total_spent: Decimal,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub source: OverviewSource,
    pub drift: Option<SnapshotDrift>,
}

impl AccountOverview {
    pub fn needs_repair(&self) -> bool {
        self.source == OverviewSource::Ledger
    }

    pub fn to_snapshot(&self, updated_at: DateTime<Utc>) -> AccountSnapshot {
        AccountSnapshot {
            customer_id: self.customer_id,
            balance: self.balance,
            total_spent: self.total_spent,
            last_payment_at: self.last_payment_at,
            updated_at,
        }
    }
}

/// Decides which figures an account overview shows. The ledger wins when no
/// snapshot exists or either figure is off by more than a cent; smaller
/// differences are float noise and the snapshot stands.
pub fn reconcile_snapshot(
    customer_id: Uuid,
    cached: Option<&AccountSnapshot>,
    computed: &TransactionAggregates,
    latest_payment_intent_at: Option<DateTime<Utc>>,
) -> AccountOverview {
    let last_payment_at = cached
        .and_then(|snapshot| snapshot.last_payment_at)
        .or(computed.last_payment_at)
        .or(latest_payment_intent_at);

    let Some(snapshot) = cached else {
        return AccountOverview {
            customer_id,
            balance: computed.balance,
            total_spent: computed.total_spent,
            last_payment_at,
            source: OverviewSource::Ledger,
            drift: None,
        };
    };

    if exceeds_cent(snapshot.balance, computed.balance)
        || exceeds_cent(snapshot.total_spent, computed.total_spent)
    {
        return AccountOverview {
            customer_id,
            balance: computed.balance,
            total_spent: computed.total_spent,
            last_payment_at,
            source: OverviewSource::Ledger,
            drift: Some(SnapshotDrift {
                balance: snapshot.balance.saturating_sub(computed.balance),
                total_spent: snapshot.total_spent.saturating_sub(computed.total_spent),
            }),
        };
    }

    AccountOverview {
        customer_id,
        balance: snapshot.balance,
        total_spent: snapshot.total_spent,
        last_payment_at,
        source: OverviewSource::Snapshot,
        drift: None,
    }
}
