use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommissionType {
    Percentage,
    /// Also stored under the legacy name `fixed`.
    FixedPerHour,
    FixedPerLesson,
    Unknown(String),
}

impl CommissionType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "percentage" => Self::Percentage,
            "fixed_per_hour" | "fixed" => Self::FixedPerHour,
            "fixed_per_lesson" => Self::FixedPerLesson,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Percentage => "percentage",
            Self::FixedPerHour => "fixed_per_hour",
            Self::FixedPerLesson => "fixed_per_lesson",
            Self::Unknown(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRule {
    pub commission_type: CommissionType,
    pub commission_value: Decimal,
}

impl CommissionRule {
    pub fn new(commission_type: CommissionType, commission_value: Decimal) -> Self {
        Self {
            commission_type,
            commission_value,
        }
    }

    /// Applied when no override, service rule or instructor default exists.
    pub fn house_default() -> Self {
        Self::new(CommissionType::Percentage, Decimal::from(50))
    }
}

/// Where a resolved rule came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionSource {
    BookingOverride,
    InstructorService,
    InstructorDefault,
    Fallback,
}

impl CommissionSource {
    pub const TIERS: [CommissionSource; 3] = [
        CommissionSource::BookingOverride,
        CommissionSource::InstructorService,
        CommissionSource::InstructorDefault,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCommission {
    pub source: CommissionSource,
    pub rule: CommissionRule,
}
