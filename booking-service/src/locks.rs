use std::sync::Arc;

use shared::{CoreError, Reservation, ReservationKind, ResourceOp};

use crate::store::Store;

/// Holds and frees the inventory a reservation claims.
///
/// Locking itself happens inside `Store::create_reservation`, in the same
/// transaction as the reservation insert; this manager owns the availability
/// pre-check that runs before that transaction and the commit/release side
/// that runs at settlement. The window between pre-check and lock write is
/// an accepted race: the guarded update is what actually decides.
pub struct ResourceLockManager<S> {
    store: Arc<S>,
}

impl<S: Store> ResourceLockManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn are_all_available(&self, kind: &ReservationKind) -> Result<bool, CoreError> {
        match kind {
            ReservationKind::Venue { slot_ids, .. } => self.store.slots_available(slot_ids).await,
            ReservationKind::Event { event_id, seats } => {
                self.store.event_has_capacity(*event_id, *seats).await
            }
            ReservationKind::Shop { lines } => self.store.stock_available(lines).await,
        }
    }

    pub async fn commit(&self, reservation: &Reservation) -> Result<(), CoreError> {
        self.store.apply_resource_op(&commit_op(reservation)).await
    }

    pub async fn release(&self, reservation: &Reservation) -> Result<(), CoreError> {
        self.store.apply_resource_op(&release_op(reservation)).await
    }
}

/// The mutation that permanently commits this reservation's resources.
pub fn commit_op(reservation: &Reservation) -> ResourceOp {
    match &reservation.kind {
        ReservationKind::Venue { .. } => ResourceOp::CommitSlots { reservation_id: reservation.id },
        ReservationKind::Event { event_id, seats } => ResourceOp::CommitSeats {
            event_id: *event_id,
            user_id: reservation.owner_id,
            seats: *seats,
        },
        ReservationKind::Shop { .. } => ResourceOp::CommitStock { reservation_id: reservation.id },
    }
}

/// The mutation that puts this reservation's resources back.
pub fn release_op(reservation: &Reservation) -> ResourceOp {
    match &reservation.kind {
        ReservationKind::Venue { .. } => {
            ResourceOp::ReleaseSlots { reservation_id: reservation.id }
        }
        ReservationKind::Event { event_id, seats } => ResourceOp::ReleaseSeats {
            event_id: *event_id,
            user_id: reservation.owner_id,
            seats: *seats,
        },
        ReservationKind::Shop { .. } => {
            ResourceOp::ReleaseStock { reservation_id: reservation.id }
        }
    }
}
