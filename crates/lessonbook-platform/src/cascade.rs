use anyhow::Result;
use lessonbook_engine::BookingCascade;

use crate::config::ServiceConfig;
use crate::pg_store::PgLedgerStore;
use crate::redis_bus::{RedisAnalyticsCache, RedisBus};

/// Cascade over Postgres; analytics invalidation only when Redis is configured.
pub type PgBookingCascade = BookingCascade<PgLedgerStore, Option<RedisAnalyticsCache>>;

pub fn analytics_cache(config: &ServiceConfig) -> Result<Option<RedisAnalyticsCache>> {
    let Some(redis_url) = config.redis_url.as_deref() else {
        return Ok(None);
    };
    let bus = RedisBus::connect(redis_url)?;
    Ok(Some(RedisAnalyticsCache::new(
        bus,
        config.analytics_channel.clone(),
    )))
}

pub fn booking_cascade(store: PgLedgerStore, config: &ServiceConfig) -> Result<PgBookingCascade> {
    Ok(BookingCascade::new(store, analytics_cache(config)?))
}
