use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use shared::{CoreError, PaymentMethod, Reservation};

use crate::store::Store;

#[derive(Debug, Clone)]
pub struct GatewayOrder {
    pub id: String,
    pub receipt: String,
}

/// External payment gateway's order API. Real integrations live behind this
/// seam; failures surface as `GatewayUnavailable`.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn create_order(
        &self,
        amount: &BigDecimal,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, CoreError>;
}

/// External wallet balance service. A `false` return is an insufficient
/// balance, not an error.
#[async_trait]
pub trait WalletService: Send + Sync {
    async fn debit(&self, user_id: Uuid, amount: &BigDecimal) -> Result<bool, CoreError>;
    async fn credit(&self, user_id: Uuid, amount: &BigDecimal) -> Result<bool, CoreError>;
}

#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub order_id: String,
    pub receipt: Option<String>,
    pub method: PaymentMethod,
}

/// Issues payment intents and verifies completion signals.
pub struct PaymentIntents<S> {
    store: Arc<S>,
    gateway: Arc<dyn GatewayClient>,
    wallet: Arc<dyn WalletService>,
    signing_secret: String,
    currency: String,
}

impl<S: Store> PaymentIntents<S> {
    pub fn new(
        store: Arc<S>,
        gateway: Arc<dyn GatewayClient>,
        wallet: Arc<dyn WalletService>,
        signing_secret: String,
        currency: String,
    ) -> Self {
        Self { store, gateway, wallet, signing_secret, currency }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Wallet payments debit synchronously and synthesize a local order
    /// token; gateway payments create a real external order. Callers must
    /// not write a ledger entry when this fails.
    pub async fn create_intent(
        &self,
        reservation: &Reservation,
        method: PaymentMethod,
    ) -> Result<PaymentIntent, CoreError> {
        if self
            .store
            .ledger_entry_for_reservation(reservation.id)
            .await?
            .is_some()
        {
            return Err(CoreError::PaymentAlreadyInitiated(reservation.id));
        }

        match method {
            PaymentMethod::Wallet => {
                let debited = self
                    .wallet
                    .debit(reservation.owner_id, &reservation.amount)
                    .await?;
                if !debited {
                    return Err(CoreError::InsufficientBalance);
                }
                let order_id = format!("wallet_{}", Uuid::new_v4().simple());
                info!(
                    reservation_id = %reservation.id,
                    order_id = %order_id,
                    amount = %reservation.amount,
                    "wallet debited for reservation"
                );
                Ok(PaymentIntent { order_id, receipt: None, method })
            }
            PaymentMethod::GatewayOrder => {
                let receipt = format!("rcpt_{}", reservation.id.simple());
                let order = self
                    .gateway
                    .create_order(&reservation.amount, &self.currency, &receipt)
                    .await?;
                info!(
                    reservation_id = %reservation.id,
                    order_id = %order.id,
                    amount = %reservation.amount,
                    "gateway order created for reservation"
                );
                Ok(PaymentIntent {
                    order_id: order.id,
                    receipt: Some(order.receipt),
                    method,
                })
            }
        }
    }

    /// Wallet: the ledger entry's existence for the order id is the proof —
    /// the debit already happened at intent time, so no signature is
    /// consulted. Gateway: recompute the completion signature and compare.
    /// A mismatch or missing field is a `false`, never an error.
    pub async fn verify_completion(
        &self,
        method: PaymentMethod,
        order_id: &str,
        payment_id: Option<&str>,
        signature: Option<&str>,
    ) -> Result<bool, CoreError> {
        match method {
            PaymentMethod::Wallet => Ok(self.store.ledger_entry(order_id).await?.is_some()),
            PaymentMethod::GatewayOrder => {
                let (Some(payment_id), Some(signature)) = (payment_id, signature) else {
                    return Ok(false);
                };
                let expected = completion_signature(order_id, payment_id, &self.signing_secret);
                Ok(expected == signature)
            }
        }
    }

    /// Puts a wallet debit back, for cancellations before confirmation.
    pub async fn refund_wallet(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<bool, CoreError> {
        self.wallet.credit(user_id, amount).await
    }
}

/// The gateway's completion signature: SHA-256 over `order_id|payment_id`
/// and the shared secret, hex-encoded.
pub fn completion_signature(order_id: &str, payment_id: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(order_id.as_bytes());
    hasher.update(b"|");
    hasher.update(payment_id.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Development gateway. Always succeeds unless given a failure rate, like a
/// real gateway having a bad day.
pub struct MockGateway {
    failure_rate: f64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self { failure_rate: 0.0 }
    }

    pub fn with_failure_rate(failure_rate: f64) -> Self {
        Self { failure_rate }
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    async fn create_order(
        &self,
        amount: &BigDecimal,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, CoreError> {
        if self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate {
            warn!(receipt, "simulated gateway outage");
            return Err(CoreError::GatewayUnavailable("simulated outage".to_string()));
        }
        let id = format!("order_{}", Uuid::new_v4().simple());
        info!(order_id = %id, %amount, currency, "mock gateway order created");
        Ok(GatewayOrder { id, receipt: receipt.to_string() })
    }
}

/// Development wallet: balances in a map, debits refused when short.
#[derive(Default)]
pub struct InMemoryWallet {
    balances: Mutex<HashMap<Uuid, BigDecimal>>,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, user_id: Uuid, amount: BigDecimal) {
        let mut balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
        let balance = balances.entry(user_id).or_insert_with(|| BigDecimal::from(0));
        *balance += amount;
    }

    pub fn balance(&self, user_id: Uuid) -> BigDecimal {
        self.balances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0))
    }
}

#[async_trait]
impl WalletService for InMemoryWallet {
    async fn debit(&self, user_id: Uuid, amount: &BigDecimal) -> Result<bool, CoreError> {
        let mut balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
        match balances.get_mut(&user_id) {
            Some(balance) if &*balance >= amount => {
                *balance -= amount.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn credit(&self, user_id: Uuid, amount: &BigDecimal) -> Result<bool, CoreError> {
        let mut balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
        let balance = balances.entry(user_id).or_insert_with(|| BigDecimal::from(0));
        *balance += amount.clone();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use shared::{CustomerSnapshot, LedgerEntry, ReservationKind};

    fn intents(store: Arc<MemoryStore>, wallet: Arc<InMemoryWallet>) -> PaymentIntents<MemoryStore> {
        PaymentIntents::new(
            store,
            Arc::new(MockGateway::new()),
            wallet,
            "test-secret".to_string(),
            "INR".to_string(),
        )
    }

    fn reservation(amount: i64) -> Reservation {
        Reservation::new_pending(
            ReservationKind::Event { event_id: Uuid::new_v4(), seats: 1 },
            BigDecimal::from(amount),
            CustomerSnapshot {
                user_id: Uuid::new_v4(),
                name: "Mina".into(),
                email: "mina@example.com".into(),
                phone: "555-0102".into(),
            },
        )
    }

    #[tokio::test]
    async fn wallet_verification_is_defined_by_ledger_presence() {
        let store = Arc::new(MemoryStore::new());
        let wallet = Arc::new(InMemoryWallet::new());
        let intents = intents(store.clone(), wallet);

        let reservation = reservation(500);
        let entry = LedgerEntry::new(
            "wallet_abc".to_string(),
            reservation.id,
            reservation.amount.clone(),
            "INR".to_string(),
            PaymentMethod::Wallet,
            "unknown".to_string(),
        );
        store.insert_ledger_entry(&entry).await.unwrap();

        // any payment id / signature combination is irrelevant for wallets
        let verified = intents
            .verify_completion(PaymentMethod::Wallet, "wallet_abc", None, Some("garbage"))
            .await
            .unwrap();
        assert!(verified);

        let unverified = intents
            .verify_completion(PaymentMethod::Wallet, "wallet_missing", Some("pay_1"), None)
            .await
            .unwrap();
        assert!(!unverified);
    }

    #[tokio::test]
    async fn gateway_verification_checks_the_signature() {
        let store = Arc::new(MemoryStore::new());
        let wallet = Arc::new(InMemoryWallet::new());
        let intents = intents(store, wallet);

        let good = completion_signature("order_1", "pay_1", "test-secret");
        assert!(intents
            .verify_completion(PaymentMethod::GatewayOrder, "order_1", Some("pay_1"), Some(&good))
            .await
            .unwrap());

        let forged = completion_signature("order_1", "pay_1", "wrong-secret");
        assert!(!intents
            .verify_completion(PaymentMethod::GatewayOrder, "order_1", Some("pay_1"), Some(&forged))
            .await
            .unwrap());

        // missing fields verify false rather than erroring
        assert!(!intents
            .verify_completion(PaymentMethod::GatewayOrder, "order_1", None, Some(&good))
            .await
            .unwrap());
        assert!(!intents
            .verify_completion(PaymentMethod::GatewayOrder, "order_1", Some("pay_1"), None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn wallet_intent_debits_or_rejects() {
        let store = Arc::new(MemoryStore::new());
        let wallet = Arc::new(InMemoryWallet::new());
        let intents = intents(store, wallet.clone());

        let reservation = reservation(500);
        wallet.deposit(reservation.owner_id, BigDecimal::from(400));
        let err = intents
            .create_intent(&reservation, PaymentMethod::Wallet)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientBalance));
        assert_eq!(wallet.balance(reservation.owner_id), BigDecimal::from(400));

        wallet.deposit(reservation.owner_id, BigDecimal::from(200));
        let intent = intents
            .create_intent(&reservation, PaymentMethod::Wallet)
            .await
            .unwrap();
        assert!(intent.order_id.starts_with("wallet_"));
        assert_eq!(wallet.balance(reservation.owner_id), BigDecimal::from(100));
    }

    #[tokio::test]
    async fn second_intent_for_the_same_reservation_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let wallet = Arc::new(InMemoryWallet::new());
        let intents = intents(store.clone(), wallet);

        let reservation = reservation(250);
        let entry = LedgerEntry::new(
            "order_existing".to_string(),
            reservation.id,
            reservation.amount.clone(),
            "INR".to_string(),
            PaymentMethod::GatewayOrder,
            "unknown".to_string(),
        );
        store.insert_ledger_entry(&entry).await.unwrap();

        let err = intents
            .create_intent(&reservation, PaymentMethod::GatewayOrder)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PaymentAlreadyInitiated(_)));
    }
}
