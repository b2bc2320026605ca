mod error;
mod retry;

pub use error::CoreError;
pub use retry::with_retries;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Failed,
    Refunded,
}

impl ReservationStatus {
    /// Terminal states never advance again; reconciliation must not touch them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Initiated,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Wallet,
    GatewayOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotAvailability {
    Available,
    Locked,
    Booked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldStatus {
    Held,
    Committed,
    Released,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// What a reservation claims, tagged by kind. Persisted as the reservation
/// row's `booking_data` blob but always handled as this union in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReservationKind {
    Venue {
        facility_id: Uuid,
        slot_ids: Vec<Uuid>,
    },
    Event {
        event_id: Uuid,
        seats: i32,
    },
    Shop {
        lines: Vec<OrderLine>,
    },
}

impl ReservationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Venue { .. } => "Venue",
            Self::Event { .. } => "Event",
            Self::Shop { .. } => "Shop",
        }
    }
}

/// Requester identity, denormalized at creation time. Never re-read from the
/// user table afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub method: PaymentMethod,
    pub order_id: String,
    pub payment_id: Option<String>,
    pub amount: BigDecimal,
    pub captured: bool,
    pub captured_at: Option<DateTime<Utc>>,
    pub refunded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: ReservationKind,
    /// Fixed at creation, immutable thereafter.
    pub amount: BigDecimal,
    pub reservation_status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub payment_details: Option<PaymentDetails>,
    pub customer: CustomerSnapshot,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn new_pending(kind: ReservationKind, amount: BigDecimal, customer: CustomerSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: customer.user_id,
            kind,
            amount,
            reservation_status: ReservationStatus::Pending,
            payment_status: PaymentStatus::Initiated,
            payment_details: None,
            customer,
            created_at: Utc::now(),
            confirmed_at: None,
            cancelled_at: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.payment_status == PaymentStatus::Paid || self.reservation_status.is_terminal()
    }
}

/// Audit record of one payment attempt, keyed by gateway order id. Created
/// when the intent is issued, updated (never re-created) at settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub order_id: String,
    pub reservation_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub captured: bool,
    pub captured_at: Option<DateTime<Utc>>,
    pub payment_id: Option<String>,
    pub display_name: String,
    pub refunded: bool,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        order_id: String,
        reservation_id: Uuid,
        amount: BigDecimal,
        currency: String,
        method: PaymentMethod,
        display_name: String,
    ) -> Self {
        Self {
            order_id,
            reservation_id,
            amount,
            currency,
            method,
            captured: false,
            captured_at: None,
            payment_id: None,
            display_name,
            refunded: false,
            created_at: Utc::now(),
        }
    }
}

/// The reservation-side half of a settlement: the target statuses and the
/// payment record to attach. Applied only while the row is still
/// Pending/Initiated, which is what makes re-delivery a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationSettlement {
    pub reservation_status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub payment_details: Option<PaymentDetails>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// A single guarded resource mutation. Each variant is idempotent: running it
/// against already-settled rows changes nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceOp {
    CommitSlots { reservation_id: Uuid },
    ReleaseSlots { reservation_id: Uuid },
    CommitSeats { event_id: Uuid, user_id: Uuid, seats: i32 },
    ReleaseSeats { event_id: Uuid, user_id: Uuid, seats: i32 },
    CommitStock { reservation_id: Uuid },
    ReleaseStock { reservation_id: Uuid },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSettlement {
    pub order_id: String,
    pub captured: bool,
    pub captured_at: Option<DateTime<Utc>>,
    pub payment_id: Option<String>,
    pub display_name: String,
    pub refunded: bool,
}

/// Everything one settlement has to change, computed up front so the store
/// can apply it in one transaction and the fallback can replay the pieces
/// independently.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPlan {
    pub reservation_id: Uuid,
    pub settlement: ReservationSettlement,
    pub resources: ResourceOp,
    pub ledger: Option<LedgerSettlement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Applied,
    AlreadySettled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_the_only_non_terminal_status() {
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(ReservationStatus::Confirmed.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Failed.is_terminal());
        assert!(ReservationStatus::Refunded.is_terminal());
    }

    #[test]
    fn new_reservation_starts_pending_and_initiated() {
        let customer = CustomerSnapshot {
            user_id: Uuid::new_v4(),
            name: "Asha".into(),
            email: "asha@example.com".into(),
            phone: "555-0100".into(),
        };
        let reservation = Reservation::new_pending(
            ReservationKind::Event { event_id: Uuid::new_v4(), seats: 2 },
            BigDecimal::from(600),
            customer.clone(),
        );
        assert_eq!(reservation.reservation_status, ReservationStatus::Pending);
        assert_eq!(reservation.payment_status, PaymentStatus::Initiated);
        assert_eq!(reservation.owner_id, customer.user_id);
        assert!(!reservation.is_settled());
        assert!(reservation.payment_details.is_none());
    }
}
