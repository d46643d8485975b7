use anyhow::{Context, Result};

const DEFAULT_ANALYTICS_CHANNEL: &str = "analytics.invalidate";
const DEFAULT_BOOKING_CHANNEL: &str = "bookings.updated";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_RECONCILE_CONCURRENCY: usize = 8;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    /// Analytics invalidation is disabled when unset.
    pub redis_url: Option<String>,
    pub analytics_channel: String,
    /// Channel the cascade worker subscribes to for booking updates.
    pub booking_channel: String,
    pub reconcile_repair: bool,
    pub reconcile_concurrency: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let analytics_channel = std::env::var("ANALYTICS_CHANNEL")
            .unwrap_or_else(|_| DEFAULT_ANALYTICS_CHANNEL.to_string());
        let booking_channel = std::env::var("BOOKING_CHANNEL")
            .unwrap_or_else(|_| DEFAULT_BOOKING_CHANNEL.to_string());

        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let reconcile_concurrency = parse_var::<usize>("RECONCILE_CONCURRENCY")?
            .unwrap_or(DEFAULT_RECONCILE_CONCURRENCY)
            .max(1);

        Ok(Self {
            database_url,
            database_max_connections,
            run_migrations: flag_var("RUN_MIGRATIONS")?,
            redis_url,
            analytics_channel,
            booking_channel,
            reconcile_repair: flag_var("RECONCILE_REPAIR")?,
            reconcile_concurrency,
        })
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} must be a number, got {raw:?}")),
        Err(_) => Ok(None),
    }
}

fn flag_var(name: &str) -> Result<bool> {
    match std::env::var(name) {
        Ok(raw) => parse_flag(&raw).with_context(|| format!("{name} must be a boolean, got {raw:?}")),
        Err(_) => Ok(false),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
