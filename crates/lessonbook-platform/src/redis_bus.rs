use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use lessonbook_core::{AnalyticsCache, Booking, BookingChanges};
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }
}

/// Published by the booking service after it saves a booking. `changes` is
/// the raw diff: changed keys plus `_previous` and `_customCommissionChanged`.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingUpdatedEvent {
    pub booking: Booking,
    #[serde(default)]
    pub changes: Value,
}

impl BookingUpdatedEvent {
    pub fn changes(&self) -> Result<BookingChanges> {
        if self.changes.is_null() {
            return Ok(BookingChanges::default());
        }
        BookingChanges::from_json(&self.changes)
    }
}

/// Message consumed by the analytics service to drop cached aggregates that
/// include the booking.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingInvalidation {
    pub booking_id: Uuid,
    pub student_id: Uuid,
    pub instructor_id: Option<Uuid>,
    pub date: NaiveDate,
    pub status: &'static str,
}

impl BookingInvalidation {
    pub fn of(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id,
            student_id: booking.student_id,
            instructor_id: booking.instructor_id,
            date: booking.date,
            status: booking.status.as_str(),
        }
    }
}

#[derive(Clone)]
pub struct RedisAnalyticsCache {
    bus: RedisBus,
    channel: String,
}

impl RedisAnalyticsCache {
    pub fn new(bus: RedisBus, channel: impl Into<String>) -> Self {
        Self {
            bus,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl AnalyticsCache for RedisAnalyticsCache {
    async fn invalidate_booking(&self, booking: &Booking) -> Result<()> {
        self.bus
            .publish_json(&self.channel, &BookingInvalidation::of(booking))
            .await
            .with_context(|| format!("publishing invalidation on {}", self.channel))
    }
}
