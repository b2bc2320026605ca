pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use uuid::Uuid;

use shared::{
    CoreError, LedgerEntry, LedgerSettlement, OrderLine, Reservation, ReservationSettlement,
    ResourceOp, SettlementOutcome, SettlementPlan,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Persistence handle threaded through the core instead of a global client.
///
/// The contract is a transactional row store with `WHERE`-guarded updates:
/// every method is atomic on its own, the two composite methods each run in
/// a single database transaction, and every mutation is guarded so that
/// re-running it against already-settled rows changes nothing.
#[async_trait]
pub trait Store: Send + Sync {
    async fn fetch_reservation(&self, id: Uuid) -> Result<Option<Reservation>, CoreError>;

    /// Inserts the reservation and locks everything its kind claims, in one
    /// transaction. Any shortfall (a slot already taken, a stock line short)
    /// aborts the whole reservation; partial locks never survive.
    async fn create_reservation(&self, reservation: &Reservation) -> Result<(), CoreError>;

    /// Applies the settlement only while the row is still Pending/Initiated.
    /// Returns whether it applied; `false` means someone settled it first.
    async fn settle_reservation(
        &self,
        id: Uuid,
        settlement: &ReservationSettlement,
    ) -> Result<bool, CoreError>;

    /// Runs one guarded resource mutation atomically.
    async fn apply_resource_op(&self, op: &ResourceOp) -> Result<(), CoreError>;

    /// The primary reconciliation transaction: reservation settle, resource
    /// op and ledger settle, all or nothing. Short-circuits without writes
    /// when the reservation is already settled.
    async fn apply_settlement(&self, plan: &SettlementPlan) -> Result<SettlementOutcome, CoreError>;

    async fn slots_available(&self, slot_ids: &[Uuid]) -> Result<bool, CoreError>;

    async fn stock_available(&self, lines: &[OrderLine]) -> Result<bool, CoreError>;

    async fn event_has_capacity(&self, event_id: Uuid, seats: i32) -> Result<bool, CoreError>;

    /// Prices of the named slots; fewer prices than ids means unknown slots.
    async fn slot_prices(&self, slot_ids: &[Uuid]) -> Result<Vec<BigDecimal>, CoreError>;

    async fn event_seat_price(&self, event_id: Uuid) -> Result<Option<BigDecimal>, CoreError>;

    async fn product_price(&self, product_id: Uuid) -> Result<Option<BigDecimal>, CoreError>;

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<(), CoreError>;

    async fn ledger_entry(&self, order_id: &str) -> Result<Option<LedgerEntry>, CoreError>;

    async fn ledger_entry_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<LedgerEntry>, CoreError>;

    /// Updates the entry for the settlement's order id; a missing row is an
    /// error, never an insert.
    async fn settle_ledger_entry(&self, settlement: &LedgerSettlement) -> Result<(), CoreError>;

    async fn venue_name(&self, venue_id: Uuid) -> Result<Option<String>, CoreError>;

    async fn event_title(&self, event_id: Uuid) -> Result<Option<String>, CoreError>;

    async fn product_name(&self, product_id: Uuid) -> Result<Option<String>, CoreError>;
}
