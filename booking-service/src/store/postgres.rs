use async_trait::async_trait;
use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use shared::{
    CoreError, LedgerEntry, LedgerSettlement, OrderLine, Reservation, ReservationKind,
    ReservationSettlement, ResourceOp, SettlementOutcome, SettlementPlan,
};

use crate::models::{DbEvent, DbLedgerEntry, DbProduct, DbReservation, DbSlot, DbStockHold};
use crate::schema::*;
use crate::store::Store;

pub type DbPool = Pool<AsyncPgConnection>;

/// Store implementation over a diesel-async Postgres pool. All guards are
/// `WHERE` clauses; the database's transactional isolation is the only lock
/// manager in the system.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, CoreError> {
        self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))
    }
}

async fn settle_reservation_on(
    conn: &mut AsyncPgConnection,
    id: Uuid,
    settlement: &ReservationSettlement,
) -> Result<bool, CoreError> {
    let payment_details = settlement
        .payment_details
        .as_ref()
        .map(serde_json::to_value)
        .transpose()?;
    let updated = diesel::update(
        reservations::table
            .filter(reservations::id.eq(id))
            .filter(reservations::reservation_status.eq("Pending"))
            .filter(reservations::payment_status.eq("Initiated")),
    )
    .set((
        reservations::reservation_status.eq(format!("{:?}", settlement.reservation_status)),
        reservations::payment_status.eq(format!("{:?}", settlement.payment_status)),
        reservations::payment_details.eq(payment_details),
        reservations::confirmed_at.eq(settlement.confirmed_at),
        reservations::cancelled_at.eq(settlement.cancelled_at),
    ))
    .execute(conn)
    .await?;
    Ok(updated == 1)
}

async fn apply_resource_op_on(
    conn: &mut AsyncPgConnection,
    op: &ResourceOp,
) -> Result<(), CoreError> {
    match op {
        ResourceOp::CommitSlots { reservation_id } => {
            diesel::update(
                slots::table
                    .filter(slots::reservation_id.eq(*reservation_id))
                    .filter(slots::availability.eq("Locked")),
            )
            .set(slots::availability.eq("Booked"))
            .execute(conn)
            .await?;
            Ok(())
        }
        ResourceOp::ReleaseSlots { reservation_id } => {
            diesel::update(slots::table.filter(slots::reservation_id.eq(*reservation_id)))
                .set((
                    slots::availability.eq("Available"),
                    slots::reservation_id.eq(None::<Uuid>),
                ))
                .execute(conn)
                .await?;
            Ok(())
        }
        ResourceOp::CommitSeats { event_id, user_id, seats } => {
            let inserted = diesel::insert_into(event_attendees::table)
                .values((
                    event_attendees::event_id.eq(*event_id),
                    event_attendees::user_id.eq(*user_id),
                ))
                .on_conflict_do_nothing()
                .execute(conn)
                .await?;
            if inserted == 0 {
                // already registered: this commit has been applied before
                return Ok(());
            }
            let updated = diesel::update(
                events::table
                    .filter(events::id.eq(*event_id))
                    .filter(events::booked_seats.le(events::capacity - *seats)),
            )
            .set(events::booked_seats.eq(events::booked_seats + *seats))
            .execute(conn)
            .await?;
            if updated == 0 {
                diesel::delete(
                    event_attendees::table
                        .filter(event_attendees::event_id.eq(*event_id))
                        .filter(event_attendees::user_id.eq(*user_id)),
                )
                .execute(conn)
                .await?;
                return Err(CoreError::CapacityExceeded(*event_id));
            }
            Ok(())
        }
        ResourceOp::ReleaseSeats { event_id, user_id, seats } => {
            let removed = diesel::delete(
                event_attendees::table
                    .filter(event_attendees::event_id.eq(*event_id))
                    .filter(event_attendees::user_id.eq(*user_id)),
            )
            .execute(conn)
            .await?;
            if removed == 0 {
                // nothing was committed for this user; double release is a no-op
                return Ok(());
            }
            let decremented = diesel::update(
                events::table
                    .filter(events::id.eq(*event_id))
                    .filter(events::booked_seats.ge(*seats)),
            )
            .set(events::booked_seats.eq(events::booked_seats - *seats))
            .execute(conn)
            .await?;
            if decremented == 0 {
                // counter drifted below the seat count; floor at zero
                diesel::update(events::table.filter(events::id.eq(*event_id)))
                    .set(events::booked_seats.eq(0))
                    .execute(conn)
                    .await?;
            }
            Ok(())
        }
        ResourceOp::CommitStock { reservation_id } => {
            // quantity moved at lock time; committing is only the status flip
            diesel::update(
                stock_holds::table
                    .filter(stock_holds::reservation_id.eq(*reservation_id))
                    .filter(stock_holds::status.eq("Held")),
            )
            .set(stock_holds::status.eq("Committed"))
            .execute(conn)
            .await?;
            Ok(())
        }
        ResourceOp::ReleaseStock { reservation_id } => {
            let holds: Vec<DbStockHold> = stock_holds::table
                .filter(stock_holds::reservation_id.eq(*reservation_id))
                .filter(stock_holds::status.eq("Held"))
                .load(conn)
                .await?;
            for hold in holds {
                let flipped = diesel::update(
                    stock_holds::table
                        .filter(stock_holds::id.eq(hold.id))
                        .filter(stock_holds::status.eq("Held")),
                )
                .set(stock_holds::status.eq("Released"))
                .execute(conn)
                .await?;
                if flipped == 1 {
                    diesel::update(products::table.filter(products::id.eq(hold.product_id)))
                        .set(products::stock.eq(products::stock + hold.quantity))
                        .execute(conn)
                        .await?;
                }
            }
            Ok(())
        }
    }
}

async fn settle_ledger_on(
    conn: &mut AsyncPgConnection,
    settlement: &LedgerSettlement,
) -> Result<(), CoreError> {
    let updated = diesel::update(
        ledger_entries::table.filter(ledger_entries::order_id.eq(settlement.order_id.clone())),
    )
    .set((
        ledger_entries::captured.eq(settlement.captured),
        ledger_entries::captured_at.eq(settlement.captured_at),
        ledger_entries::payment_id.eq(settlement.payment_id.clone()),
        ledger_entries::display_name.eq(settlement.display_name.clone()),
        ledger_entries::refunded.eq(settlement.refunded),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(CoreError::LedgerEntryMissing(settlement.order_id.clone()));
    }
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn fetch_reservation(&self, id: Uuid) -> Result<Option<Reservation>, CoreError> {
        let mut conn = self.conn().await?;
        let row = reservations::table
            .filter(reservations::id.eq(id))
            .first::<DbReservation>(&mut conn)
            .await
            .optional()?;
        row.map(Reservation::try_from).transpose()
    }

    async fn create_reservation(&self, reservation: &Reservation) -> Result<(), CoreError> {
        let mut conn = self.conn().await?;
        let row = DbReservation::try_from(reservation)?;
        let kind = reservation.kind.clone();
        let reservation_id = reservation.id;
        conn.transaction::<_, CoreError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(reservations::table)
                    .values(&row)
                    .execute(conn)
                    .await?;

                match &kind {
                    ReservationKind::Venue { slot_ids, .. } => {
                        let locked = diesel::update(
                            slots::table
                                .filter(slots::id.eq_any(slot_ids.clone()))
                                .filter(slots::availability.eq("Available")),
                        )
                        .set((
                            slots::availability.eq("Locked"),
                            slots::reservation_id.eq(reservation_id),
                        ))
                        .execute(conn)
                        .await?;
                        if locked != slot_ids.len() {
                            return Err(CoreError::SlotUnavailable);
                        }
                    }
                    ReservationKind::Event { event_id, seats } => {
                        let within_capacity: i64 = events::table
                            .filter(events::id.eq(*event_id))
                            .filter(events::booked_seats.le(events::capacity - *seats))
                            .count()
                            .get_result(conn)
                            .await?;
                        if within_capacity == 0 {
                            return Err(CoreError::CapacityExceeded(*event_id));
                        }
                    }
                    ReservationKind::Shop { lines } => {
                        for line in lines {
                            let reserved = diesel::update(
                                products::table
                                    .filter(products::id.eq(line.product_id))
                                    .filter(products::stock.ge(line.quantity)),
                            )
                            .set(products::stock.eq(products::stock - line.quantity))
                            .execute(conn)
                            .await?;
                            if reserved == 0 {
                                return Err(CoreError::InsufficientStock(line.product_id));
                            }
                            let hold = DbStockHold {
                                id: Uuid::new_v4(),
                                reservation_id,
                                product_id: line.product_id,
                                quantity: line.quantity,
                                status: "Held".to_string(),
                            };
                            diesel::insert_into(stock_holds::table)
                                .values(&hold)
                                .execute(conn)
                                .await?;
                        }
                    }
                }

                Ok(())
            })
        })
        .await
    }

    async fn settle_reservation(
        &self,
        id: Uuid,
        settlement: &ReservationSettlement,
    ) -> Result<bool, CoreError> {
        let mut conn = self.conn().await?;
        settle_reservation_on(&mut conn, id, settlement).await
    }

    async fn apply_resource_op(&self, op: &ResourceOp) -> Result<(), CoreError> {
        let mut conn = self.conn().await?;
        let op = op.clone();
        conn.transaction::<_, CoreError, _>(|conn| {
            Box::pin(async move { apply_resource_op_on(conn, &op).await })
        })
        .await
    }

    async fn apply_settlement(&self, plan: &SettlementPlan) -> Result<SettlementOutcome, CoreError> {
        let mut conn = self.conn().await?;
        let plan = plan.clone();
        conn.transaction::<_, CoreError, _>(|conn| {
            Box::pin(async move {
                let applied =
                    settle_reservation_on(conn, plan.reservation_id, &plan.settlement).await?;
                if !applied {
                    return Ok(SettlementOutcome::AlreadySettled);
                }
                apply_resource_op_on(conn, &plan.resources).await?;
                if let Some(ledger) = &plan.ledger {
                    settle_ledger_on(conn, ledger).await?;
                }
                Ok(SettlementOutcome::Applied)
            })
        })
        .await
    }

    async fn slots_available(&self, slot_ids: &[Uuid]) -> Result<bool, CoreError> {
        let mut conn = self.conn().await?;
        let rows: Vec<DbSlot> = slots::table
            .filter(slots::id.eq_any(slot_ids.to_vec()))
            .load(&mut conn)
            .await?;
        Ok(rows.len() == slot_ids.len() && rows.iter().all(|slot| slot.availability == "Available"))
    }

    async fn stock_available(&self, lines: &[OrderLine]) -> Result<bool, CoreError> {
        let mut conn = self.conn().await?;
        for line in lines {
            let product = products::table
                .filter(products::id.eq(line.product_id))
                .first::<DbProduct>(&mut conn)
                .await
                .optional()?;
            match product {
                Some(product) if product.stock >= line.quantity => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn event_has_capacity(&self, event_id: Uuid, seats: i32) -> Result<bool, CoreError> {
        let mut conn = self.conn().await?;
        let event = events::table
            .filter(events::id.eq(event_id))
            .first::<DbEvent>(&mut conn)
            .await
            .optional()?;
        Ok(event.map(|e| e.booked_seats + seats <= e.capacity).unwrap_or(false))
    }

    async fn slot_prices(&self, slot_ids: &[Uuid]) -> Result<Vec<BigDecimal>, CoreError> {
        let mut conn = self.conn().await?;
        let prices = slots::table
            .filter(slots::id.eq_any(slot_ids.to_vec()))
            .select(slots::price)
            .load::<BigDecimal>(&mut conn)
            .await?;
        Ok(prices)
    }

    async fn event_seat_price(&self, event_id: Uuid) -> Result<Option<BigDecimal>, CoreError> {
        let mut conn = self.conn().await?;
        let price = events::table
            .filter(events::id.eq(event_id))
            .select(events::seat_price)
            .first::<BigDecimal>(&mut conn)
            .await
            .optional()?;
        Ok(price)
    }

    async fn product_price(&self, product_id: Uuid) -> Result<Option<BigDecimal>, CoreError> {
        let mut conn = self.conn().await?;
        let price = products::table
            .filter(products::id.eq(product_id))
            .select(products::price)
            .first::<BigDecimal>(&mut conn)
            .await
            .optional()?;
        Ok(price)
    }

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<(), CoreError> {
        let mut conn = self.conn().await?;
        let row = DbLedgerEntry::from(entry);
        diesel::insert_into(ledger_entries::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn ledger_entry(&self, order_id: &str) -> Result<Option<LedgerEntry>, CoreError> {
        let mut conn = self.conn().await?;
        let row = ledger_entries::table
            .filter(ledger_entries::order_id.eq(order_id.to_string()))
            .first::<DbLedgerEntry>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(LedgerEntry::from))
    }

    async fn ledger_entry_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<LedgerEntry>, CoreError> {
        let mut conn = self.conn().await?;
        let row = ledger_entries::table
            .filter(ledger_entries::reservation_id.eq(reservation_id))
            .first::<DbLedgerEntry>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(LedgerEntry::from))
    }

    async fn settle_ledger_entry(&self, settlement: &LedgerSettlement) -> Result<(), CoreError> {
        let mut conn = self.conn().await?;
        settle_ledger_on(&mut conn, settlement).await
    }

    async fn venue_name(&self, venue_id: Uuid) -> Result<Option<String>, CoreError> {
        let mut conn = self.conn().await?;
        let name = venues::table
            .filter(venues::id.eq(venue_id))
            .select(venues::name)
            .first::<String>(&mut conn)
            .await
            .optional()?;
        Ok(name)
    }

    async fn event_title(&self, event_id: Uuid) -> Result<Option<String>, CoreError> {
        let mut conn = self.conn().await?;
        let title = events::table
            .filter(events::id.eq(event_id))
            .select(events::title)
            .first::<String>(&mut conn)
            .await
            .optional()?;
        Ok(title)
    }

    async fn product_name(&self, product_id: Uuid) -> Result<Option<String>, CoreError> {
        let mut conn = self.conn().await?;
        let name = products::table
            .filter(products::id.eq(product_id))
            .select(products::name)
            .first::<String>(&mut conn)
            .await
            .optional()?;
        Ok(name)
    }
}
