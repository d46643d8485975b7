use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Done,
    CheckedOut,
    Cancelled,
    #[serde(rename = "no-show")]
    NoShow,
}

impl BookingStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "done" => Some(Self::Done),
            "checked_out" => Some(Self::CheckedOut),
            "cancelled" => Some(Self::Cancelled),
            "no-show" | "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Done => "done",
            Self::CheckedOut => "checked_out",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no-show",
        }
    }

    /// `completed`, `done` and `checked_out` all mean the lesson took place.
    pub fn is_completed_like(self) -> bool {
        matches!(self, Self::Completed | Self::Done | Self::CheckedOut)
    }

    pub fn is_terminal(self) -> bool {
        self.is_completed_like() || matches!(self, Self::Cancelled | Self::NoShow)
    }

    /// Lifecycle allowed by the booking screens. The cascade never checks this;
    /// it only reacts to the diff it is handed.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Confirmed | Self::Cancelled),
            Self::Confirmed => {
                next.is_completed_like() || matches!(next, Self::Cancelled | Self::NoShow)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Individual,
    Package,
}

impl PaymentStatus {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("package") {
            Self::Package
        } else {
            Self::Individual
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub student_id: Uuid,
    pub instructor_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub final_amount: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub duration: Decimal,
    pub status: BookingStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub customer_package_id: Option<Uuid>,
    pub currency: String,
    pub date: NaiveDate,
}

impl Booking {
    /// Price the customer was quoted: `final_amount`, then `amount`, then zero.
    /// A stored zero counts as "not set".
    pub fn base_amount(&self) -> Decimal {
        first_nonzero(self.final_amount, self.amount)
    }

    pub fn is_package_funded(&self) -> bool {
        self.payment_status == PaymentStatus::Package
    }
}

pub(crate) fn first_nonzero(primary: Option<Decimal>, secondary: Option<Decimal>) -> Decimal {
    primary
        .filter(|value| !value.is_zero())
        .or(secondary.filter(|value| !value.is_zero()))
        .unwrap_or(Decimal::ZERO)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerPackage {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub service_package_id: Option<Uuid>,
    pub package_name: Option<String>,
    pub purchase_price: Option<Decimal>,
    pub total_hours: Option<Decimal>,
    pub used_hours: Option<Decimal>,
    pub remaining_hours: Option<Decimal>,
}

/// Catalogue template a customer package was sold from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePackage {
    pub id: Uuid,
    pub name: String,
    pub total_hours: Option<Decimal>,
    pub sessions_count: Option<i32>,
    pub duration_hours: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstructorEarning {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub instructor_id: Uuid,
    /// Fraction of the lesson amount, 0..=1.
    pub commission_rate: Decimal,
    pub total_earnings: Decimal,
    pub lesson_amount: Decimal,
    pub lesson_duration: Decimal,
    pub lesson_date: NaiveDate,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "credit" | "in" | "incoming" => Some(Self::Credit),
            "debit" | "out" | "outgoing" => Some(Self::Debit),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }
}

/// One wallet transaction. Rows are immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub amount: Option<Decimal>,
    pub direction: Option<Direction>,
    pub transaction_type: String,
    pub currency: String,
    pub status: Option<String>,
    pub description: Option<String>,
    pub booking_id: Option<Uuid>,
    pub rental_id: Option<Uuid>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// Amount with the sign applied. Unsigned rows carry their sign in
    /// `direction`; an absent amount reads as zero.
    pub fn signed_amount(&self) -> Decimal {
        let amount = self.amount.unwrap_or(Decimal::ZERO);
        match self.direction {
            Some(Direction::Credit) => amount.abs(),
            Some(Direction::Debit) => -amount.abs(),
            None => amount,
        }
    }

    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.transaction_date.or(self.created_at)
    }
}

/// Denormalised account summary. Written independently of the ledger, so it
/// can drift.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountSnapshot {
    pub customer_id: Uuid,
    pub balance: Decimal,
    pub total_spent: Decimal,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageUsageAudit {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub customer_package_id: Option<Uuid>,
    pub old_amount: Decimal,
    pub new_amount: Decimal,
    pub package_name: Option<String>,
    pub created_at: DateTime<Utc>,
}
