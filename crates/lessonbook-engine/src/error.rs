use thiserror::Error;
use uuid::Uuid;

/// Failures that roll the whole cascade back. Best-effort steps never produce
/// one; they are reported on the `CascadeReport` instead.
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("could not open a ledger session for booking {booking_id}")]
    Begin {
        booking_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
    #[error("instructor earnings upsert failed for booking {booking_id}")]
    EarningsUpsert {
        booking_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
    #[error("customer balance adjustment failed for booking {booking_id}")]
    BalanceAdjustment {
        booking_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
    #[error("could not commit cascade for booking {booking_id}")]
    Commit {
        booking_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

impl CascadeError {
    pub fn booking_id(&self) -> Uuid {
        match self {
            Self::Begin { booking_id, .. }
            | Self::EarningsUpsert { booking_id, .. }
            | Self::BalanceAdjustment { booking_id, .. }
            | Self::Commit { booking_id, .. } => *booking_id,
        }
    }
}
