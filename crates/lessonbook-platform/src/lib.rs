pub mod cascade;
pub mod config;
pub mod db;
pub mod pg_store;
pub mod redis_bus;

pub use cascade::{PgBookingCascade, analytics_cache, booking_cascade};
pub use config::ServiceConfig;
pub use db::{connect_database, run_migrations};
pub use pg_store::{PgCascadeSession, PgLedgerStore};
pub use redis_bus::{BookingInvalidation, BookingUpdatedEvent, RedisAnalyticsCache, RedisBus};
