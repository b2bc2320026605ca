use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared::{
    CoreError, CustomerSnapshot, LedgerEntry, LedgerSettlement, PaymentMethod, PaymentStatus,
    Reservation, ReservationKind, ReservationSettlement, ReservationStatus, SettlementPlan,
};

use crate::gateway::{PaymentIntent, PaymentIntents};
use crate::locks::{self, ResourceLockManager};
use crate::store::Store;

/// A validated reservation request, as handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub customer: CustomerSnapshot,
    pub kind: ReservationKind,
    pub method: PaymentMethod,
    pub amount: BigDecimal,
}

/// Creates reservations (lock + insert + payment intent + ledger entry) and
/// handles the simple cancellation transition. Settlement after payment
/// completion belongs to the reconciliation engine, not here.
pub struct BookingService<S> {
    store: Arc<S>,
    locks: ResourceLockManager<S>,
    intents: Arc<PaymentIntents<S>>,
}

impl<S: Store> BookingService<S> {
    pub fn new(store: Arc<S>, intents: Arc<PaymentIntents<S>>) -> Self {
        let locks = ResourceLockManager::new(store.clone());
        Self { store, locks, intents }
    }

    pub async fn create_reservation(
        &self,
        request: NewReservation,
    ) -> Result<(Reservation, PaymentIntent), CoreError> {
        let expected = self.line_total(&request.kind).await?;
        if expected != request.amount {
            return Err(CoreError::AmountMismatch { expected, given: request.amount });
        }

        // best-effort pre-check; the guarded lock write decides for real
        if !self.locks.are_all_available(&request.kind).await? {
            return Err(CoreError::ResourcesUnavailable);
        }

        let reservation =
            Reservation::new_pending(request.kind, request.amount, request.customer);
        self.store.create_reservation(&reservation).await?;
        info!(
            reservation_id = %reservation.id,
            kind = reservation.kind.label(),
            amount = %reservation.amount,
            "reservation created with resources locked"
        );

        match self.intents.create_intent(&reservation, request.method).await {
            Ok(intent) => {
                let entry = LedgerEntry::new(
                    intent.order_id.clone(),
                    reservation.id,
                    reservation.amount.clone(),
                    self.intents.currency().to_string(),
                    request.method,
                    "unknown".to_string(),
                );
                self.store.insert_ledger_entry(&entry).await?;
                Ok((reservation, intent))
            }
            Err(err) => {
                warn!(
                    reservation_id = %reservation.id,
                    %err,
                    "payment intent failed, releasing reservation"
                );
                if let Err(cleanup_err) =
                    self.store.apply_settlement(&abort_plan(&reservation)).await
                {
                    error!(
                        reservation_id = %reservation.id,
                        %cleanup_err,
                        "failed to release aborted reservation"
                    );
                }
                Err(err)
            }
        }
    }

    /// Cancels a reservation that is not yet in a terminal paid state,
    /// releasing whatever it locked. Wallet debits are credited back.
    pub async fn cancel_reservation(&self, id: Uuid) -> Result<Reservation, CoreError> {
        let reservation = self
            .store
            .fetch_reservation(id)
            .await?
            .ok_or(CoreError::ReservationNotFound(id))?;
        if reservation.is_settled() {
            return Err(CoreError::NotCancellable(id));
        }

        let entry = self.store.ledger_entry_for_reservation(id).await?;
        let wallet_refund = entry
            .as_ref()
            .map(|e| e.method == PaymentMethod::Wallet)
            .unwrap_or(false);

        let plan = SettlementPlan {
            reservation_id: reservation.id,
            settlement: ReservationSettlement {
                reservation_status: ReservationStatus::Cancelled,
                payment_status: if wallet_refund {
                    PaymentStatus::Refunded
                } else {
                    PaymentStatus::Failed
                },
                payment_details: None,
                confirmed_at: None,
                cancelled_at: Some(Utc::now()),
            },
            resources: locks::release_op(&reservation),
            ledger: entry.as_ref().map(|e| LedgerSettlement {
                order_id: e.order_id.clone(),
                captured: false,
                captured_at: None,
                payment_id: None,
                display_name: e.display_name.clone(),
                refunded: wallet_refund,
            }),
        };
        self.store.apply_settlement(&plan).await?;

        if wallet_refund {
            if let Err(err) = self
                .intents
                .refund_wallet(reservation.owner_id, &reservation.amount)
                .await
            {
                error!(
                    reservation_id = %reservation.id,
                    %err,
                    "wallet refund failed after cancellation"
                );
            }
        }

        info!(reservation_id = %reservation.id, "reservation cancelled");
        self.store
            .fetch_reservation(id)
            .await?
            .ok_or(CoreError::ReservationNotFound(id))
    }

    /// What the reservation's components add up to, from stored prices. The
    /// request amount must match; it is never recomputed afterwards.
    async fn line_total(&self, kind: &ReservationKind) -> Result<BigDecimal, CoreError> {
        match kind {
            ReservationKind::Venue { slot_ids, .. } => {
                let prices = self.store.slot_prices(slot_ids).await?;
                if prices.len() != slot_ids.len() {
                    return Err(CoreError::ResourcesUnavailable);
                }
                Ok(prices
                    .into_iter()
                    .fold(BigDecimal::from(0), |total, price| total + price))
            }
            ReservationKind::Event { event_id, seats } => {
                let price = self
                    .store
                    .event_seat_price(*event_id)
                    .await?
                    .ok_or(CoreError::EventNotFound(*event_id))?;
                Ok(price * BigDecimal::from(*seats))
            }
            ReservationKind::Shop { lines } => {
                let mut total = BigDecimal::from(0);
                for line in lines {
                    let price = self
                        .store
                        .product_price(line.product_id)
                        .await?
                        .ok_or(CoreError::ProductNotFound(line.product_id))?;
                    total += price * BigDecimal::from(line.quantity);
                }
                Ok(total)
            }
        }
    }
}

/// Settlement that fails a reservation whose payment intent never happened:
/// resources go back, no ledger entry exists to touch.
fn abort_plan(reservation: &Reservation) -> SettlementPlan {
    SettlementPlan {
        reservation_id: reservation.id,
        settlement: ReservationSettlement {
            reservation_status: ReservationStatus::Failed,
            payment_status: PaymentStatus::Failed,
            payment_details: None,
            confirmed_at: None,
            cancelled_at: None,
        },
        resources: locks::release_op(reservation),
        ledger: None,
    }
}
