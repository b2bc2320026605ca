use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared::{
    CoreError, LedgerEntry, PaymentMethod, PaymentStatus, Reservation, ReservationStatus,
};

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::reservations)]
pub struct DbReservation {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: String,
    pub booking_data: serde_json::Value,
    pub amount: BigDecimal,
    pub reservation_status: String,
    pub payment_status: String,
    pub payment_details: Option<serde_json::Value>,
    pub customer_details: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::slots)]
pub struct DbSlot {
    pub id: Uuid,
    pub venue_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub price: BigDecimal,
    pub availability: String,
    pub reservation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::events)]
pub struct DbEvent {
    pub id: Uuid,
    pub title: String,
    pub seat_price: BigDecimal,
    pub capacity: i32,
    pub booked_seats: i32,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::products)]
pub struct DbProduct {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::stock_holds)]
pub struct DbStockHold {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::ledger_entries)]
pub struct DbLedgerEntry {
    pub order_id: String,
    pub reservation_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub method: String,
    pub captured: bool,
    pub captured_at: Option<DateTime<Utc>>,
    pub payment_id: Option<String>,
    pub display_name: String,
    pub refunded: bool,
    pub created_at: Option<DateTime<Utc>>,
}

pub fn reservation_status_from_str(s: &str) -> ReservationStatus {
    match s {
        "Pending" => ReservationStatus::Pending,
        "Confirmed" => ReservationStatus::Confirmed,
        "Cancelled" => ReservationStatus::Cancelled,
        "Refunded" => ReservationStatus::Refunded,
        _ => ReservationStatus::Failed,
    }
}

pub fn payment_status_from_str(s: &str) -> PaymentStatus {
    match s {
        "Initiated" => PaymentStatus::Initiated,
        "Paid" => PaymentStatus::Paid,
        "Refunded" => PaymentStatus::Refunded,
        _ => PaymentStatus::Failed,
    }
}

pub fn payment_method_from_str(s: &str) -> PaymentMethod {
    match s {
        "Wallet" => PaymentMethod::Wallet,
        _ => PaymentMethod::GatewayOrder,
    }
}

impl TryFrom<&Reservation> for DbReservation {
    type Error = CoreError;

    fn try_from(reservation: &Reservation) -> Result<Self, Self::Error> {
        let payment_details = reservation
            .payment_details
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        Ok(Self {
            id: reservation.id,
            owner_id: reservation.owner_id,
            kind: reservation.kind.label().to_string(),
            booking_data: serde_json::to_value(&reservation.kind)?,
            amount: reservation.amount.clone(),
            reservation_status: format!("{:?}", reservation.reservation_status),
            payment_status: format!("{:?}", reservation.payment_status),
            payment_details,
            customer_details: serde_json::to_value(&reservation.customer)?,
            created_at: Some(reservation.created_at),
            confirmed_at: reservation.confirmed_at,
            cancelled_at: reservation.cancelled_at,
        })
    }
}

impl TryFrom<DbReservation> for Reservation {
    type Error = CoreError;

    fn try_from(row: DbReservation) -> Result<Self, Self::Error> {
        let kind = serde_json::from_value(row.booking_data)?;
        let payment_details = row
            .payment_details
            .map(serde_json::from_value)
            .transpose()?;
        let customer = serde_json::from_value(row.customer_details)?;
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            kind,
            amount: row.amount,
            reservation_status: reservation_status_from_str(&row.reservation_status),
            payment_status: payment_status_from_str(&row.payment_status),
            payment_details,
            customer,
            created_at: row.created_at.unwrap_or_else(Utc::now),
            confirmed_at: row.confirmed_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

impl From<&LedgerEntry> for DbLedgerEntry {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            order_id: entry.order_id.clone(),
            reservation_id: entry.reservation_id,
            amount: entry.amount.clone(),
            currency: entry.currency.clone(),
            method: format!("{:?}", entry.method),
            captured: entry.captured,
            captured_at: entry.captured_at,
            payment_id: entry.payment_id.clone(),
            display_name: entry.display_name.clone(),
            refunded: entry.refunded,
            created_at: Some(entry.created_at),
        }
    }
}

impl From<DbLedgerEntry> for LedgerEntry {
    fn from(row: DbLedgerEntry) -> Self {
        Self {
            order_id: row.order_id,
            reservation_id: row.reservation_id,
            amount: row.amount,
            currency: row.currency,
            method: payment_method_from_str(&row.method),
            captured: row.captured,
            captured_at: row.captured_at,
            payment_id: row.payment_id,
            display_name: row.display_name,
            refunded: row.refunded,
            created_at: row.created_at.unwrap_or_else(Utc::now),
        }
    }
}
