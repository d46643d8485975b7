use std::collections::BTreeSet;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, first_nonzero};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BookingField {
    FinalAmount,
    Amount,
    Duration,
    InstructorId,
    InstructorCommission,
    ServiceId,
    Status,
    PaymentStatus,
    CustomerPackageId,
    Date,
}

impl BookingField {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "finalAmount" | "final_amount" => Some(Self::FinalAmount),
            "amount" => Some(Self::Amount),
            "duration" => Some(Self::Duration),
            "instructorId" | "instructor_id" => Some(Self::InstructorId),
            "instructorCommission" | "instructor_commission" => Some(Self::InstructorCommission),
            "serviceId" | "service_id" => Some(Self::ServiceId),
            "status" => Some(Self::Status),
            "paymentStatus" | "payment_status" => Some(Self::PaymentStatus),
            "customerPackageId" | "customer_package_id" => Some(Self::CustomerPackageId),
            "date" => Some(Self::Date),
            _ => None,
        }
    }
}

/// Values the booking held before the mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreviousValues {
    pub final_amount: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub duration: Option<Decimal>,
    pub status: Option<BookingStatus>,
    pub instructor_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
}

impl PreviousValues {
    pub fn of(booking: &Booking) -> Self {
        Self {
            final_amount: booking.final_amount,
            amount: booking.amount,
            duration: Some(booking.duration),
            status: Some(booking.status),
            instructor_id: booking.instructor_id,
            service_id: booking.service_id,
        }
    }

    pub fn base_amount(&self) -> Decimal {
        first_nonzero(self.final_amount, self.amount)
    }
}

/// Diff handed to the cascade alongside the booking's new state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingChanges {
    pub fields: BTreeSet<BookingField>,
    pub previous: PreviousValues,
    pub custom_commission_changed: bool,
}

impl BookingChanges {
    pub fn new(fields: impl IntoIterator<Item = BookingField>, previous: PreviousValues) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            previous,
            custom_commission_changed: false,
        }
    }

    pub fn with_custom_commission_changed(mut self) -> Self {
        self.custom_commission_changed = true;
        self
    }

    /// Reads the update payload the booking handlers produce: changed fields
    /// keyed by their camelCase name, plus `_previous` and
    /// `_customCommissionChanged`. Keys the cascade does not care about are
    /// ignored.
    pub fn from_json(payload: &Value) -> Result<Self> {
        let object = payload
            .as_object()
            .context("booking changes must be a JSON object")?;

        let mut changes = Self::default();
        for (key, value) in object {
            match key.as_str() {
                "_previous" => {
                    changes.previous = serde_json::from_value(value.clone())
                        .context("invalid _previous snapshot")?;
                }
                "_customCommissionChanged" => {
                    changes.custom_commission_changed = value.as_bool().unwrap_or(false);
                }
                other => {
                    if let Some(field) = BookingField::from_key(other) {
                        changes.fields.insert(field);
                    }
                }
            }
        }

        Ok(changes)
    }

    pub fn between(before: &Booking, after: &Booking) -> Self {
        let mut fields = BTreeSet::new();
        if before.final_amount != after.final_amount {
            fields.insert(BookingField::FinalAmount);
        }
        if before.amount != after.amount {
            fields.insert(BookingField::Amount);
        }
        if before.duration != after.duration {
            fields.insert(BookingField::Duration);
        }
        if before.instructor_id != after.instructor_id {
            fields.insert(BookingField::InstructorId);
        }
        if before.service_id != after.service_id {
            fields.insert(BookingField::ServiceId);
        }
        if before.status != after.status {
            fields.insert(BookingField::Status);
        }
        if before.payment_status != after.payment_status {
            fields.insert(BookingField::PaymentStatus);
        }
        if before.customer_package_id != after.customer_package_id {
            fields.insert(BookingField::CustomerPackageId);
        }
        if before.date != after.date {
            fields.insert(BookingField::Date);
        }

        Self {
            fields,
            previous: PreviousValues::of(before),
            custom_commission_changed: false,
        }
    }

    pub fn contains(&self, field: BookingField) -> bool {
        self.fields.contains(&field)
    }

    pub fn price_changed(&self) -> bool {
        self.contains(BookingField::FinalAmount) || self.contains(BookingField::Amount)
    }
}
