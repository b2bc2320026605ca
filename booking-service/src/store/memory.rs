use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use uuid::Uuid;

use shared::{
    CoreError, HoldStatus, LedgerEntry, LedgerSettlement, OrderLine, PaymentStatus, Reservation,
    ReservationKind, ReservationSettlement, ReservationStatus, ResourceOp, SettlementOutcome,
    SettlementPlan, SlotAvailability,
};

use crate::store::Store;

#[derive(Debug, Clone)]
pub struct MemSlot {
    pub venue_id: Uuid,
    pub price: BigDecimal,
    pub availability: SlotAvailability,
    pub reservation_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct MemEvent {
    pub title: String,
    pub seat_price: BigDecimal,
    pub capacity: i32,
    pub booked_seats: i32,
    pub attendees: HashSet<Uuid>,
}

#[derive(Debug, Clone)]
pub struct MemProduct {
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
}

#[derive(Debug, Clone)]
pub struct MemStockHold {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub status: HoldStatus,
}

#[derive(Debug, Clone, Default)]
struct State {
    reservations: HashMap<Uuid, Reservation>,
    venues: HashMap<Uuid, String>,
    slots: HashMap<Uuid, MemSlot>,
    events: HashMap<Uuid, MemEvent>,
    products: HashMap<Uuid, MemProduct>,
    stock_holds: Vec<MemStockHold>,
    ledger: HashMap<String, LedgerEntry>,
}

/// In-memory Store honouring the same guarded-update contract as the
/// Postgres implementation. Composites take one lock and roll back to a
/// snapshot on error, which is what makes them transactions.
///
/// `fail_next` injects failures per named operation and `calls` counts
/// invocations, so tests can force the primary transaction down into the
/// fallback tier and observe which sub-effects ran.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, u32>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` invocations of `op` fail with an injected error.
    pub fn fail_next(&self, op: &str, times: u32) {
        lock(&self.failures).insert(op.to_string(), times);
    }

    pub fn calls(&self, op: &str) -> u32 {
        lock(&self.calls).get(op).copied().unwrap_or(0)
    }

    fn tick(&self, op: &str) -> Result<(), CoreError> {
        *lock(&self.calls).entry(op.to_string()).or_insert(0) += 1;
        if let Some(remaining) = lock(&self.failures).get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CoreError::Storage(format!("injected {op} failure")));
            }
        }
        Ok(())
    }

    pub fn add_venue(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).venues.insert(id, name.to_string());
        id
    }

    pub fn add_slot(&self, venue_id: Uuid, price: BigDecimal) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).slots.insert(
            id,
            MemSlot {
                venue_id,
                price,
                availability: SlotAvailability::Available,
                reservation_id: None,
            },
        );
        id
    }

    pub fn add_event(&self, title: &str, seat_price: BigDecimal, capacity: i32) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).events.insert(
            id,
            MemEvent {
                title: title.to_string(),
                seat_price,
                capacity,
                booked_seats: 0,
                attendees: HashSet::new(),
            },
        );
        id
    }

    pub fn add_product(&self, name: &str, price: BigDecimal, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).products.insert(
            id,
            MemProduct { name: name.to_string(), price, stock },
        );
        id
    }

    pub fn set_booked_seats(&self, event_id: Uuid, booked_seats: i32) {
        if let Some(event) = lock(&self.state).events.get_mut(&event_id) {
            event.booked_seats = booked_seats;
        }
    }

    pub fn slot(&self, id: Uuid) -> Option<MemSlot> {
        lock(&self.state).slots.get(&id).cloned()
    }

    pub fn event(&self, id: Uuid) -> Option<MemEvent> {
        lock(&self.state).events.get(&id).cloned()
    }

    pub fn product(&self, id: Uuid) -> Option<MemProduct> {
        lock(&self.state).products.get(&id).cloned()
    }

    pub fn reservation(&self, id: Uuid) -> Option<Reservation> {
        lock(&self.state).reservations.get(&id).cloned()
    }

    pub fn ledger(&self, order_id: &str) -> Option<LedgerEntry> {
        lock(&self.state).ledger.get(order_id).cloned()
    }

    pub fn holds_for(&self, reservation_id: Uuid) -> Vec<MemStockHold> {
        lock(&self.state)
            .stock_holds
            .iter()
            .filter(|h| h.reservation_id == reservation_id)
            .cloned()
            .collect()
    }
}

fn settle_reservation_in(
    state: &mut State,
    id: Uuid,
    settlement: &ReservationSettlement,
) -> bool {
    let Some(reservation) = state.reservations.get_mut(&id) else {
        return false;
    };
    if reservation.reservation_status != ReservationStatus::Pending
        || reservation.payment_status != PaymentStatus::Initiated
    {
        return false;
    }
    reservation.reservation_status = settlement.reservation_status;
    reservation.payment_status = settlement.payment_status;
    reservation.payment_details = settlement.payment_details.clone();
    reservation.confirmed_at = settlement.confirmed_at;
    reservation.cancelled_at = settlement.cancelled_at;
    true
}

fn apply_resource_op_in(state: &mut State, op: &ResourceOp) -> Result<(), CoreError> {
    match op {
        ResourceOp::CommitSlots { reservation_id } => {
            for slot in state.slots.values_mut() {
                if slot.reservation_id == Some(*reservation_id)
                    && slot.availability == SlotAvailability::Locked
                {
                    slot.availability = SlotAvailability::Booked;
                }
            }
            Ok(())
        }
        ResourceOp::ReleaseSlots { reservation_id } => {
            for slot in state.slots.values_mut() {
                if slot.reservation_id == Some(*reservation_id) {
                    slot.availability = SlotAvailability::Available;
                    slot.reservation_id = None;
                }
            }
            Ok(())
        }
        ResourceOp::CommitSeats { event_id, user_id, seats } => {
            let event = state
                .events
                .get_mut(event_id)
                .ok_or(CoreError::EventNotFound(*event_id))?;
            if event.attendees.contains(user_id) {
                return Ok(());
            }
            if event.booked_seats + seats > event.capacity {
                return Err(CoreError::CapacityExceeded(*event_id));
            }
            event.booked_seats += seats;
            event.attendees.insert(*user_id);
            Ok(())
        }
        ResourceOp::ReleaseSeats { event_id, user_id, seats } => {
            let event = state
                .events
                .get_mut(event_id)
                .ok_or(CoreError::EventNotFound(*event_id))?;
            if event.attendees.remove(user_id) {
                event.booked_seats = (event.booked_seats - seats).max(0);
            }
            Ok(())
        }
        ResourceOp::CommitStock { reservation_id } => {
            for hold in &mut state.stock_holds {
                if hold.reservation_id == *reservation_id && hold.status == HoldStatus::Held {
                    hold.status = HoldStatus::Committed;
                }
            }
            Ok(())
        }
        ResourceOp::ReleaseStock { reservation_id } => {
            let mut restocked = Vec::new();
            for hold in &mut state.stock_holds {
                if hold.reservation_id == *reservation_id && hold.status == HoldStatus::Held {
                    hold.status = HoldStatus::Released;
                    restocked.push((hold.product_id, hold.quantity));
                }
            }
            for (product_id, quantity) in restocked {
                if let Some(product) = state.products.get_mut(&product_id) {
                    product.stock += quantity;
                }
            }
            Ok(())
        }
    }
}

fn settle_ledger_in(state: &mut State, settlement: &LedgerSettlement) -> Result<(), CoreError> {
    let entry = state
        .ledger
        .get_mut(&settlement.order_id)
        .ok_or_else(|| CoreError::LedgerEntryMissing(settlement.order_id.clone()))?;
    entry.captured = settlement.captured;
    entry.captured_at = settlement.captured_at;
    entry.payment_id = settlement.payment_id.clone();
    entry.display_name = settlement.display_name.clone();
    entry.refunded = settlement.refunded;
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch_reservation(&self, id: Uuid) -> Result<Option<Reservation>, CoreError> {
        self.tick("fetch_reservation")?;
        Ok(lock(&self.state).reservations.get(&id).cloned())
    }

    async fn create_reservation(&self, reservation: &Reservation) -> Result<(), CoreError> {
        self.tick("create_reservation")?;
        let mut state = lock(&self.state);
        let snapshot = state.clone();
        let result = (|| {
            state.reservations.insert(reservation.id, reservation.clone());
            match &reservation.kind {
                ReservationKind::Venue { slot_ids, .. } => {
                    let mut locked = 0;
                    for slot_id in slot_ids {
                        if let Some(slot) = state.slots.get_mut(slot_id) {
                            if slot.availability == SlotAvailability::Available {
                                slot.availability = SlotAvailability::Locked;
                                slot.reservation_id = Some(reservation.id);
                                locked += 1;
                            }
                        }
                    }
                    if locked != slot_ids.len() {
                        return Err(CoreError::SlotUnavailable);
                    }
                }
                ReservationKind::Event { event_id, seats } => {
                    let event = state
                        .events
                        .get(event_id)
                        .ok_or(CoreError::EventNotFound(*event_id))?;
                    if event.booked_seats + seats > event.capacity {
                        return Err(CoreError::CapacityExceeded(*event_id));
                    }
                }
                ReservationKind::Shop { lines } => {
                    for line in lines {
                        let product = state
                            .products
                            .get_mut(&line.product_id)
                            .ok_or(CoreError::ProductNotFound(line.product_id))?;
                        if product.stock < line.quantity {
                            return Err(CoreError::InsufficientStock(line.product_id));
                        }
                        product.stock -= line.quantity;
                        state.stock_holds.push(MemStockHold {
                            id: Uuid::new_v4(),
                            reservation_id: reservation.id,
                            product_id: line.product_id,
                            quantity: line.quantity,
                            status: HoldStatus::Held,
                        });
                    }
                }
            }
            Ok(())
        })();
        if result.is_err() {
            *state = snapshot;
        }
        result
    }

    async fn settle_reservation(
        &self,
        id: Uuid,
        settlement: &ReservationSettlement,
    ) -> Result<bool, CoreError> {
        self.tick("settle_reservation")?;
        Ok(settle_reservation_in(&mut lock(&self.state), id, settlement))
    }

    async fn apply_resource_op(&self, op: &ResourceOp) -> Result<(), CoreError> {
        self.tick("apply_resource_op")?;
        apply_resource_op_in(&mut lock(&self.state), op)
    }

    async fn apply_settlement(&self, plan: &SettlementPlan) -> Result<SettlementOutcome, CoreError> {
        self.tick("apply_settlement")?;
        let mut state = lock(&self.state);
        let snapshot = state.clone();
        let result = (|| {
            if !settle_reservation_in(&mut state, plan.reservation_id, &plan.settlement) {
                return Ok(SettlementOutcome::AlreadySettled);
            }
            apply_resource_op_in(&mut state, &plan.resources)?;
            if let Some(ledger) = &plan.ledger {
                settle_ledger_in(&mut state, ledger)?;
            }
            Ok(SettlementOutcome::Applied)
        })();
        if result.is_err() {
            *state = snapshot;
        }
        result
    }

    async fn slots_available(&self, slot_ids: &[Uuid]) -> Result<bool, CoreError> {
        self.tick("slots_available")?;
        let state = lock(&self.state);
        Ok(slot_ids.iter().all(|id| {
            state
                .slots
                .get(id)
                .map(|slot| slot.availability == SlotAvailability::Available)
                .unwrap_or(false)
        }))
    }

    async fn stock_available(&self, lines: &[OrderLine]) -> Result<bool, CoreError> {
        self.tick("stock_available")?;
        let state = lock(&self.state);
        Ok(lines.iter().all(|line| {
            state
                .products
                .get(&line.product_id)
                .map(|product| product.stock >= line.quantity)
                .unwrap_or(false)
        }))
    }

    async fn event_has_capacity(&self, event_id: Uuid, seats: i32) -> Result<bool, CoreError> {
        self.tick("event_has_capacity")?;
        let state = lock(&self.state);
        Ok(state
            .events
            .get(&event_id)
            .map(|event| event.booked_seats + seats <= event.capacity)
            .unwrap_or(false))
    }

    async fn slot_prices(&self, slot_ids: &[Uuid]) -> Result<Vec<BigDecimal>, CoreError> {
        self.tick("slot_prices")?;
        let state = lock(&self.state);
        Ok(slot_ids
            .iter()
            .filter_map(|id| state.slots.get(id).map(|slot| slot.price.clone()))
            .collect())
    }

    async fn event_seat_price(&self, event_id: Uuid) -> Result<Option<BigDecimal>, CoreError> {
        self.tick("event_seat_price")?;
        Ok(lock(&self.state)
            .events
            .get(&event_id)
            .map(|event| event.seat_price.clone()))
    }

    async fn product_price(&self, product_id: Uuid) -> Result<Option<BigDecimal>, CoreError> {
        self.tick("product_price")?;
        Ok(lock(&self.state)
            .products
            .get(&product_id)
            .map(|product| product.price.clone()))
    }

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<(), CoreError> {
        self.tick("insert_ledger_entry")?;
        lock(&self.state)
            .ledger
            .insert(entry.order_id.clone(), entry.clone());
        Ok(())
    }

    async fn ledger_entry(&self, order_id: &str) -> Result<Option<LedgerEntry>, CoreError> {
        self.tick("ledger_entry")?;
        Ok(lock(&self.state).ledger.get(order_id).cloned())
    }

    async fn ledger_entry_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<LedgerEntry>, CoreError> {
        self.tick("ledger_entry_for_reservation")?;
        Ok(lock(&self.state)
            .ledger
            .values()
            .find(|entry| entry.reservation_id == reservation_id)
            .cloned())
    }

    async fn settle_ledger_entry(&self, settlement: &LedgerSettlement) -> Result<(), CoreError> {
        self.tick("settle_ledger_entry")?;
        settle_ledger_in(&mut lock(&self.state), settlement)
    }

    async fn venue_name(&self, venue_id: Uuid) -> Result<Option<String>, CoreError> {
        self.tick("venue_name")?;
        Ok(lock(&self.state).venues.get(&venue_id).cloned())
    }

    async fn event_title(&self, event_id: Uuid) -> Result<Option<String>, CoreError> {
        self.tick("event_title")?;
        Ok(lock(&self.state)
            .events
            .get(&event_id)
            .map(|event| event.title.clone()))
    }

    async fn product_name(&self, product_id: Uuid) -> Result<Option<String>, CoreError> {
        self.tick("product_name")?;
        Ok(lock(&self.state)
            .products
            .get(&product_id)
            .map(|product| product.name.clone()))
    }
}
