use anyhow::Context;
use chrono::Utc;
use lessonbook_core::AccountStore;
use lessonbook_finance::{AccountOverview, compute_transaction_aggregates, reconcile_snapshot};
use tracing::{info, warn};
use uuid::Uuid;

/// Account summary as shown to the customer: the ledger is folded and checked
/// against the cached snapshot, and whichever is trustworthy is returned.
pub async fn account_overview<A>(store: &A, customer_id: Uuid) -> anyhow::Result<AccountOverview>
where
    A: AccountStore + ?Sized,
{
    let entries = store
        .ledger_entries(customer_id)
        .await
        .with_context(|| format!("loading ledger for customer {customer_id}"))?;
    let computed = compute_transaction_aggregates(&entries);

    let cached = store
        .account_snapshot(customer_id)
        .await
        .with_context(|| format!("loading account snapshot for customer {customer_id}"))?;

    let known_payment = cached
        .as_ref()
        .and_then(|snapshot| snapshot.last_payment_at)
        .or(computed.last_payment_at);
    let latest_intent = match known_payment {
        Some(_) => None,
        None => store.latest_succeeded_payment_at(customer_id).await?,
    };

    let overview = reconcile_snapshot(customer_id, cached.as_ref(), &computed, latest_intent);
    if let Some(drift) = overview.drift {
        warn!(
            %customer_id,
            balance_drift = %drift.balance,
            total_spent_drift = %drift.total_spent,
            "account snapshot disagrees with ledger"
        );
    }
    if computed.unclassified_entries > 0 {
        warn!(
            %customer_id,
            count = computed.unclassified_entries,
            "ledger entries with unrecognised types left out of balance"
        );
    }

    Ok(overview)
}

/// Recomputes the overview and rewrites the snapshot when the ledger won.
pub async fn repair_account_snapshot<A>(
    store: &A,
    customer_id: Uuid,
) -> anyhow::Result<AccountOverview>
where
    A: AccountStore + ?Sized,
{
    let overview = account_overview(store, customer_id).await?;
    if overview.needs_repair() {
        store
            .upsert_account_snapshot(&overview.to_snapshot(Utc::now()))
            .await
            .with_context(|| format!("writing account snapshot for customer {customer_id}"))?;
        info!(%customer_id, balance = %overview.balance, "account snapshot rewritten from ledger");
    }

    Ok(overview)
}
