use bigdecimal::BigDecimal;
use thiserror::Error;
use uuid::Uuid;

/// Error taxonomy of the settlement core. Validation-class variants are
/// rejected before any lock or transaction begins and are never retried;
/// the transient variants are what the retry tiers exist for.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("reservation not found: {0}")]
    ReservationNotFound(Uuid),

    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    #[error("product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("requested resources are no longer available")]
    ResourcesUnavailable,

    #[error("one or more slots are not available to lock")]
    SlotUnavailable,

    #[error("insufficient stock for product {0}")]
    InsufficientStock(Uuid),

    #[error("event {0} has no remaining capacity")]
    CapacityExceeded(Uuid),

    #[error("insufficient wallet balance")]
    InsufficientBalance,

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("payment already initiated for reservation {0}")]
    PaymentAlreadyInitiated(Uuid),

    #[error("amount {given} does not match line total {expected}")]
    AmountMismatch { expected: BigDecimal, given: BigDecimal },

    #[error("reservation {0} can no longer be cancelled")]
    NotCancellable(Uuid),

    #[error("no ledger entry for order {0}")]
    LedgerEntryMissing(String),

    #[error("db error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Validation-class failures are the caller's fault and must not enter
    /// the retry tiers.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ResourcesUnavailable
                | Self::SlotUnavailable
                | Self::InsufficientStock(_)
                | Self::CapacityExceeded(_)
                | Self::InsufficientBalance
                | Self::PaymentAlreadyInitiated(_)
                | Self::AmountMismatch { .. }
                | Self::NotCancellable(_)
        )
    }
}
