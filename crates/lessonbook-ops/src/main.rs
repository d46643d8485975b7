use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use futures_util::stream;
use lessonbook_core::AccountStore;
use lessonbook_engine::{account_overview, repair_account_snapshot};
use lessonbook_platform::{
    BookingUpdatedEvent, PgBookingCascade, PgLedgerStore, RedisBus, ServiceConfig,
    booking_cascade, connect_database, run_migrations,
};
use redis::Msg;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct RunTally {
    checked: AtomicUsize,
    drifted: AtomicUsize,
    failed: AtomicUsize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "lessonbook_ops=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    let pool = connect_database(&config.database_url, config.database_max_connections).await?;
    if config.run_migrations {
        run_migrations(&pool).await?;
    }
    let store = PgLedgerStore::new(pool);

    match std::env::args().nth(1).as_deref() {
        Some("cascade") => run_cascade(store, &config).await,
        Some("reconcile") | None => run_reconcile(store, &config).await,
        Some(other) => anyhow::bail!("unknown mode {other:?}, expected `reconcile` or `cascade`"),
    }
}

async fn run_cascade(store: PgLedgerStore, config: &ServiceConfig) -> Result<()> {
    let redis_url = config
        .redis_url
        .as_deref()
        .context("REDIS_URL is required for the cascade worker")?;
    let redis = RedisBus::connect(redis_url)?;
    let cascade = booking_cascade(store, config)?;

    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.subscribe(&config.booking_channel).await?;
    let mut messages = pubsub.on_message();

    info!(channel = %config.booking_channel, "cascade worker subscribed");

    loop {
        let msg = messages
            .next()
            .await
            .with_context(|| format!("{} stream ended unexpectedly", config.booking_channel))?;
        if let Err(err) = handle_booking_update(&cascade, msg).await {
            error!("failed to cascade booking update: {err:#}");
        }
    }
}

async fn handle_booking_update(cascade: &PgBookingCascade, msg: Msg) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let event: BookingUpdatedEvent = serde_json::from_str(&payload)?;
    let changes = event.changes()?;

    let report = cascade
        .cascade_booking_update(&event.booking, &changes)
        .await?;
    for (step, failure) in report.best_effort_failures() {
        warn!(booking_id = %event.booking.id, step, "best-effort step failed: {failure}");
    }
    Ok(())
}

async fn run_reconcile(store: PgLedgerStore, config: &ServiceConfig) -> Result<()> {
    let customers = store
        .customer_ids()
        .await
        .context("listing customers with ledger history")?;
    info!(
        customers = customers.len(),
        repair = config.reconcile_repair,
        concurrency = config.reconcile_concurrency,
        "account reconciliation started"
    );

    let repair = config.reconcile_repair;
    let tally = RunTally::default();
    stream::iter(customers)
        .for_each_concurrent(config.reconcile_concurrency, |customer_id| {
            let store = &store;
            let tally = &tally;
            async move {
                reconcile_customer(store, customer_id, repair, tally).await;
            }
        })
        .await;

    let failed = tally.failed.load(Ordering::Relaxed);
    info!(
        checked = tally.checked.load(Ordering::Relaxed),
        drifted = tally.drifted.load(Ordering::Relaxed),
        failed,
        "account reconciliation finished"
    );

    if failed > 0 {
        anyhow::bail!("{failed} accounts could not be reconciled");
    }
    Ok(())
}

async fn reconcile_customer(
    store: &PgLedgerStore,
    customer_id: Uuid,
    repair: bool,
    tally: &RunTally,
) {
    let result = if repair {
        repair_account_snapshot(store, customer_id).await
    } else {
        account_overview(store, customer_id).await
    };

    tally.checked.fetch_add(1, Ordering::Relaxed);
    match result {
        Ok(overview) if overview.drift.is_some() => {
            tally.drifted.fetch_add(1, Ordering::Relaxed);
            if !repair {
                warn!(%customer_id, "snapshot drift left in place, RECONCILE_REPAIR is off");
            }
        }
        Ok(_) => {}
        Err(err) => {
            tally.failed.fetch_add(1, Ordering::Relaxed);
            error!(%customer_id, "failed to reconcile account: {err:#}");
        }
    }
}
