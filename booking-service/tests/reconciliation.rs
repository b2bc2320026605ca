//! Reconciliation engine scenarios: settlement, release symmetry,
//! idempotency against duplicate completion signals, the capacity guard,
//! and the two-tier retry/fallback path.

use std::sync::Arc;
use std::time::Duration;

use bigdecimal::BigDecimal;
use uuid::Uuid;

use booking_service::bookings::{BookingService, NewReservation};
use booking_service::gateway::{InMemoryWallet, MockGateway, PaymentIntents};
use booking_service::reconcile::{ReconcileRequest, ReconciliationEngine};
use booking_service::store::{MemoryStore, Store};
use shared::{
    CoreError, CustomerSnapshot, HoldStatus, OrderLine, PaymentMethod, PaymentStatus,
    ReservationKind, ReservationStatus, SettlementOutcome, SlotAvailability,
};

struct Harness {
    store: Arc<MemoryStore>,
    wallet: Arc<InMemoryWallet>,
    bookings: BookingService<MemoryStore>,
    engine: ReconciliationEngine<MemoryStore>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let wallet = Arc::new(InMemoryWallet::new());
    let intents = Arc::new(PaymentIntents::new(
        store.clone(),
        Arc::new(MockGateway::new()),
        wallet.clone(),
        "test-secret".to_string(),
        "INR".to_string(),
    ));
    let bookings = BookingService::new(store.clone(), intents);
    let engine = ReconciliationEngine::with_retry_delay(store.clone(), Duration::from_millis(1));
    Harness { store, wallet, bookings, engine }
}

fn customer() -> CustomerSnapshot {
    CustomerSnapshot {
        user_id: Uuid::new_v4(),
        name: "Asha".into(),
        email: "asha@example.com".into(),
        phone: "555-0100".into(),
    }
}

fn completion(
    reservation_id: Uuid,
    verified: bool,
    amount: BigDecimal,
    order_id: &str,
    method: PaymentMethod,
) -> ReconcileRequest {
    ReconcileRequest {
        reservation_id,
        verified,
        amount,
        order_id: order_id.to_string(),
        payment_id: Some("pay_123".to_string()),
        method,
    }
}

#[tokio::test]
async fn verified_completion_confirms_books_slots_and_captures_ledger() {
    let h = harness();
    let venue = h.store.add_venue("Indoor Court 1");
    let s1 = h.store.add_slot(venue, BigDecimal::from(300));
    let s2 = h.store.add_slot(venue, BigDecimal::from(300));
    let customer = customer();
    h.wallet.deposit(customer.user_id, BigDecimal::from(600));

    let (reservation, intent) = h
        .bookings
        .create_reservation(NewReservation {
            customer,
            kind: ReservationKind::Venue { facility_id: venue, slot_ids: vec![s1, s2] },
            method: PaymentMethod::Wallet,
            amount: BigDecimal::from(600),
        })
        .await
        .unwrap();

    let outcome = h
        .engine
        .try_reconcile(&completion(
            reservation.id,
            true,
            BigDecimal::from(600),
            &intent.order_id,
            PaymentMethod::Wallet,
        ))
        .await
        .unwrap();
    assert_eq!(outcome, SettlementOutcome::Applied);

    let settled = h.store.reservation(reservation.id).unwrap();
    assert_eq!(settled.reservation_status, ReservationStatus::Confirmed);
    assert_eq!(settled.payment_status, PaymentStatus::Paid);
    assert!(settled.confirmed_at.is_some());
    let details = settled.payment_details.unwrap();
    assert!(details.captured);
    assert_eq!(details.order_id, intent.order_id);

    assert_eq!(h.store.slot(s1).unwrap().availability, SlotAvailability::Booked);
    assert_eq!(h.store.slot(s2).unwrap().availability, SlotAvailability::Booked);

    let ledger = h.store.ledger(&intent.order_id).unwrap();
    assert!(ledger.captured);
    assert!(ledger.captured_at.is_some());
    assert_eq!(ledger.display_name, "Indoor Court 1");
}

#[tokio::test]
async fn failed_completion_releases_every_locked_slot() {
    let h = harness();
    let venue = h.store.add_venue("Indoor Court 2");
    let s1 = h.store.add_slot(venue, BigDecimal::from(300));
    let s2 = h.store.add_slot(venue, BigDecimal::from(300));

    let (reservation, intent) = h
        .bookings
        .create_reservation(NewReservation {
            customer: customer(),
            kind: ReservationKind::Venue { facility_id: venue, slot_ids: vec![s1, s2] },
            method: PaymentMethod::GatewayOrder,
            amount: BigDecimal::from(600),
        })
        .await
        .unwrap();
    assert_eq!(h.store.slot(s1).unwrap().availability, SlotAvailability::Locked);

    h.engine
        .try_reconcile(&completion(
            reservation.id,
            false,
            BigDecimal::from(600),
            &intent.order_id,
            PaymentMethod::GatewayOrder,
        ))
        .await
        .unwrap();

    let settled = h.store.reservation(reservation.id).unwrap();
    assert_eq!(settled.reservation_status, ReservationStatus::Failed);
    assert_eq!(settled.payment_status, PaymentStatus::Failed);

    for slot_id in [s1, s2] {
        let slot = h.store.slot(slot_id).unwrap();
        assert_eq!(slot.availability, SlotAvailability::Available);
        assert_eq!(slot.reservation_id, None);
    }

    let ledger = h.store.ledger(&intent.order_id).unwrap();
    assert!(!ledger.captured);
}

#[tokio::test]
async fn duplicate_completion_signal_does_not_double_commit_seats() {
    let h = harness();
    let event = h.store.add_event("Launch Night", BigDecimal::from(100), 10);
    let customer = customer();
    h.wallet.deposit(customer.user_id, BigDecimal::from(200));

    let (reservation, intent) = h
        .bookings
        .create_reservation(NewReservation {
            customer,
            kind: ReservationKind::Event { event_id: event, seats: 2 },
            method: PaymentMethod::Wallet,
            amount: BigDecimal::from(200),
        })
        .await
        .unwrap();

    let request = completion(
        reservation.id,
        true,
        BigDecimal::from(200),
        &intent.order_id,
        PaymentMethod::Wallet,
    );
    assert_eq!(
        h.engine.try_reconcile(&request).await.unwrap(),
        SettlementOutcome::Applied
    );
    let confirmed_at = h.store.reservation(reservation.id).unwrap().confirmed_at;

    // duplicate webhook delivery with identical arguments
    assert_eq!(
        h.engine.try_reconcile(&request).await.unwrap(),
        SettlementOutcome::AlreadySettled
    );

    let event_row = h.store.event(event).unwrap();
    assert_eq!(event_row.booked_seats, 2);
    assert_eq!(event_row.attendees.len(), 1);
    assert_eq!(
        h.store.reservation(reservation.id).unwrap().confirmed_at,
        confirmed_at
    );
}

#[tokio::test]
async fn capacity_guard_rejects_commit_and_leaves_the_counter_alone() {
    let h = harness();
    let event = h.store.add_event("Sold Out Show", BigDecimal::from(100), 10);
    h.store.set_booked_seats(event, 8);
    let customer = customer();
    let user_id = customer.user_id;
    h.wallet.deposit(user_id, BigDecimal::from(200));

    let (reservation, intent) = h
        .bookings
        .create_reservation(NewReservation {
            customer,
            kind: ReservationKind::Event { event_id: event, seats: 2 },
            method: PaymentMethod::Wallet,
            amount: BigDecimal::from(200),
        })
        .await
        .unwrap();

    // another sale lands between lock and settlement
    h.store.set_booked_seats(event, 9);

    let err = h
        .engine
        .try_reconcile(&completion(
            reservation.id,
            true,
            BigDecimal::from(200),
            &intent.order_id,
            PaymentMethod::Wallet,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CapacityExceeded(_)));

    let event_row = h.store.event(event).unwrap();
    assert_eq!(event_row.booked_seats, 9);
    assert!(!event_row.attendees.contains(&user_id));
}

#[tokio::test]
async fn fallback_retries_skip_effects_that_already_succeeded() {
    let h = harness();
    let venue = h.store.add_venue("Indoor Court 3");
    let s1 = h.store.add_slot(venue, BigDecimal::from(300));

    let (reservation, intent) = h
        .bookings
        .create_reservation(NewReservation {
            customer: customer(),
            kind: ReservationKind::Venue { facility_id: venue, slot_ids: vec![s1] },
            method: PaymentMethod::GatewayOrder,
            amount: BigDecimal::from(300),
        })
        .await
        .unwrap();

    // primary transaction throws on all three attempts, then the resource
    // release fails once more inside the first fallback pass
    h.store.fail_next("apply_settlement", 3);
    h.store.fail_next("apply_resource_op", 1);

    let outcome = h
        .engine
        .try_reconcile(&completion(
            reservation.id,
            false,
            BigDecimal::from(300),
            &intent.order_id,
            PaymentMethod::GatewayOrder,
        ))
        .await
        .unwrap();
    assert_eq!(outcome, SettlementOutcome::Applied);

    assert_eq!(h.store.calls("apply_settlement"), 3);
    // second fallback pass retried only the resource release
    assert_eq!(h.store.calls("settle_reservation"), 1);
    assert_eq!(h.store.calls("settle_ledger_entry"), 1);
    assert_eq!(h.store.calls("apply_resource_op"), 2);

    let settled = h.store.reservation(reservation.id).unwrap();
    assert_eq!(settled.reservation_status, ReservationStatus::Failed);
    let slot = h.store.slot(s1).unwrap();
    assert_eq!(slot.availability, SlotAvailability::Available);
    assert_eq!(slot.reservation_id, None);
    assert!(!h.store.ledger(&intent.order_id).unwrap().captured);
}

#[tokio::test]
async fn shop_order_commit_flips_holds_without_touching_quantity_again() {
    let h = harness();
    let product = h.store.add_product("Grip Tape", BigDecimal::from(50), 10);
    let customer = customer();
    h.wallet.deposit(customer.user_id, BigDecimal::from(150));

    let (reservation, intent) = h
        .bookings
        .create_reservation(NewReservation {
            customer,
            kind: ReservationKind::Shop {
                lines: vec![OrderLine { product_id: product, quantity: 3 }],
            },
            method: PaymentMethod::Wallet,
            amount: BigDecimal::from(150),
        })
        .await
        .unwrap();
    // quantity moved at lock time
    assert_eq!(h.store.product(product).unwrap().stock, 7);

    h.engine
        .try_reconcile(&completion(
            reservation.id,
            true,
            BigDecimal::from(150),
            &intent.order_id,
            PaymentMethod::Wallet,
        ))
        .await
        .unwrap();

    assert_eq!(h.store.product(product).unwrap().stock, 7);
    let holds = h.store.holds_for(reservation.id);
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].status, HoldStatus::Committed);
}

#[tokio::test]
async fn shop_order_release_restores_stock_exactly_once() {
    let h = harness();
    let product = h.store.add_product("Shuttlecocks", BigDecimal::from(20), 5);

    let (reservation, intent) = h
        .bookings
        .create_reservation(NewReservation {
            customer: customer(),
            kind: ReservationKind::Shop {
                lines: vec![OrderLine { product_id: product, quantity: 2 }],
            },
            method: PaymentMethod::GatewayOrder,
            amount: BigDecimal::from(40),
        })
        .await
        .unwrap();
    assert_eq!(h.store.product(product).unwrap().stock, 3);

    h.engine
        .try_reconcile(&completion(
            reservation.id,
            false,
            BigDecimal::from(40),
            &intent.order_id,
            PaymentMethod::GatewayOrder,
        ))
        .await
        .unwrap();
    assert_eq!(h.store.product(product).unwrap().stock, 5);

    // released holds stay released; re-running the op must not restock twice
    h.store
        .apply_resource_op(&shared::ResourceOp::ReleaseStock { reservation_id: reservation.id })
        .await
        .unwrap();
    assert_eq!(h.store.product(product).unwrap().stock, 5);
}

#[tokio::test]
async fn event_release_is_idempotent_and_never_goes_negative() {
    let h = harness();
    let event = h.store.add_event("Open Mic", BigDecimal::from(10), 50);
    let user_id = Uuid::new_v4();

    h.store
        .apply_resource_op(&shared::ResourceOp::CommitSeats { event_id: event, user_id, seats: 3 })
        .await
        .unwrap();
    assert_eq!(h.store.event(event).unwrap().booked_seats, 3);

    let release = shared::ResourceOp::ReleaseSeats { event_id: event, user_id, seats: 3 };
    h.store.apply_resource_op(&release).await.unwrap();
    assert_eq!(h.store.event(event).unwrap().booked_seats, 0);

    // user is no longer in the registered set, so nothing moves
    h.store.apply_resource_op(&release).await.unwrap();
    let event_row = h.store.event(event).unwrap();
    assert_eq!(event_row.booked_seats, 0);
    assert!(event_row.attendees.is_empty());
}
