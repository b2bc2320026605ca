//! Reservation settlement service: slot/seat/stock locking, payment intents,
//! and the reconciliation engine that turns payment completion signals into
//! final reservation, resource and ledger state.

pub mod api;
pub mod bookings;
pub mod gateway;
pub mod locks;
pub mod models;
pub mod reconcile;
pub mod schema;
pub mod store;
