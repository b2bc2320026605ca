use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bigdecimal::BigDecimal;
use chrono::Utc;
use futures::join;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared::{
    with_retries, CoreError, LedgerSettlement, PaymentDetails, PaymentMethod, PaymentStatus,
    Reservation, ReservationKind, ReservationSettlement, ReservationStatus, SettlementOutcome,
    SettlementPlan,
};

use crate::locks;
use crate::store::Store;

const PRIMARY_ATTEMPTS: usize = 3;
const FALLBACK_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_millis(1000);

/// One payment completion signal, as handed over by the verification call.
#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub reservation_id: Uuid,
    pub verified: bool,
    pub amount: BigDecimal,
    pub order_id: String,
    pub payment_id: Option<String>,
    pub method: PaymentMethod,
}

/// Turns a payment completion signal into final reservation, resource and
/// ledger state.
///
/// The primary path applies everything in one store transaction, retried on
/// a fixed delay. Only when every primary attempt has failed does the engine
/// decompose the settlement into its three sub-effects and settle them
/// independently; each sub-effect is idempotent, so a retried fallback pass
/// can skip whatever already went through.
pub struct ReconciliationEngine<S> {
    store: Arc<S>,
    retry_delay: Duration,
}

#[derive(Default)]
struct SettlementFlags {
    reservation: AtomicBool,
    resources: AtomicBool,
    ledger: AtomicBool,
}

impl<S: Store> ReconciliationEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store, retry_delay: RETRY_DELAY }
    }

    /// Same engine, faster clock. Used by tests.
    pub fn with_retry_delay(store: Arc<S>, retry_delay: Duration) -> Self {
        Self { store, retry_delay }
    }

    /// Entry point for callers that already answered the client: any
    /// terminal failure is logged for operator replay, never re-thrown.
    pub async fn reconcile(&self, request: ReconcileRequest) {
        if let Err(err) = self.try_reconcile(&request).await {
            error!(
                reservation_id = %request.reservation_id,
                order_id = %request.order_id,
                %err,
                "reconciliation exhausted, reservation left for operator replay"
            );
        }
    }

    pub async fn try_reconcile(
        &self,
        request: &ReconcileRequest,
    ) -> Result<SettlementOutcome, CoreError> {
        let reservation = self
            .store
            .fetch_reservation(request.reservation_id)
            .await?
            .ok_or(CoreError::ReservationNotFound(request.reservation_id))?;

        if reservation.is_settled() {
            info!(
                reservation_id = %reservation.id,
                order_id = %request.order_id,
                "reservation already settled, ignoring duplicate completion signal"
            );
            return Ok(SettlementOutcome::AlreadySettled);
        }

        let display_name = self.display_name(&reservation).await;
        let plan = build_plan(&reservation, request, display_name);

        let store = &self.store;
        match with_retries(|| store.apply_settlement(&plan), PRIMARY_ATTEMPTS, self.retry_delay)
            .await
        {
            Ok(outcome) => {
                info!(
                    reservation_id = %plan.reservation_id,
                    order_id = %request.order_id,
                    verified = request.verified,
                    "settlement transaction applied"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(
                    reservation_id = %plan.reservation_id,
                    order_id = %request.order_id,
                    %err,
                    "settlement transaction exhausted retries, settling effects independently"
                );
                self.settle_independently(&plan).await?;
                Ok(SettlementOutcome::Applied)
            }
        }
    }

    /// Resolves a human-readable name for the ledger. Best effort only;
    /// lookup failures must never block the settlement itself.
    async fn display_name(&self, reservation: &Reservation) -> String {
        let resolved = match &reservation.kind {
            ReservationKind::Venue { facility_id, .. } => {
                self.store.venue_name(*facility_id).await
            }
            ReservationKind::Event { event_id, .. } => self.store.event_title(*event_id).await,
            ReservationKind::Shop { lines } => match lines.first() {
                Some(line) => self.store.product_name(line.product_id).await,
                None => Ok(None),
            },
        };
        match resolved {
            Ok(Some(name)) => name,
            Ok(None) => "unknown".to_string(),
            Err(err) => {
                warn!(reservation_id = %reservation.id, %err, "display name lookup failed");
                "unknown".to_string()
            }
        }
    }

    async fn settle_independently(&self, plan: &SettlementPlan) -> Result<(), CoreError> {
        let flags = SettlementFlags::default();
        with_retries(
            || self.fallback_pass(plan, &flags),
            FALLBACK_ATTEMPTS,
            self.retry_delay,
        )
        .await
    }

    /// One fallback pass: all three sub-effects run concurrently and each is
    /// allowed to fail on its own. Effects that already succeeded in an
    /// earlier pass are skipped via their flag.
    async fn fallback_pass(
        &self,
        plan: &SettlementPlan,
        flags: &SettlementFlags,
    ) -> Result<(), CoreError> {
        let reservation_effect = async {
            if flags.reservation.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.store
                .settle_reservation(plan.reservation_id, &plan.settlement)
                .await?;
            flags.reservation.store(true, Ordering::SeqCst);
            Ok(())
        };
        let resources_effect = async {
            if flags.resources.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.store.apply_resource_op(&plan.resources).await?;
            flags.resources.store(true, Ordering::SeqCst);
            Ok(())
        };
        let ledger_effect = async {
            if flags.ledger.load(Ordering::SeqCst) {
                return Ok(());
            }
            if let Some(ledger) = &plan.ledger {
                self.store.settle_ledger_entry(ledger).await?;
            }
            flags.ledger.store(true, Ordering::SeqCst);
            Ok(())
        };

        let (reservation, resources, ledger): (
            Result<(), CoreError>,
            Result<(), CoreError>,
            Result<(), CoreError>,
        ) = join!(reservation_effect, resources_effect, ledger_effect);

        for (effect, outcome) in [
            ("reservation", &reservation),
            ("resources", &resources),
            ("ledger", &ledger),
        ] {
            if let Err(err) = outcome {
                error!(
                    reservation_id = %plan.reservation_id,
                    effect,
                    %err,
                    "fallback sub-effect failed"
                );
            }
        }

        reservation?;
        resources?;
        ledger?;
        Ok(())
    }
}

/// Computes the full settlement for a completion signal up front: target
/// statuses, the resource mutation for the reservation's kind, and the
/// ledger update.
pub fn build_plan(
    reservation: &Reservation,
    request: &ReconcileRequest,
    display_name: String,
) -> SettlementPlan {
    let now = Utc::now();
    if request.verified {
        SettlementPlan {
            reservation_id: reservation.id,
            settlement: ReservationSettlement {
                reservation_status: ReservationStatus::Confirmed,
                payment_status: PaymentStatus::Paid,
                payment_details: Some(PaymentDetails {
                    method: request.method,
                    order_id: request.order_id.clone(),
                    payment_id: request.payment_id.clone(),
                    amount: request.amount.clone(),
                    captured: true,
                    captured_at: Some(now),
                    refunded: false,
                }),
                confirmed_at: Some(now),
                cancelled_at: None,
            },
            resources: locks::commit_op(reservation),
            ledger: Some(LedgerSettlement {
                order_id: request.order_id.clone(),
                captured: true,
                captured_at: Some(now),
                payment_id: request.payment_id.clone(),
                display_name,
                refunded: false,
            }),
        }
    } else {
        SettlementPlan {
            reservation_id: reservation.id,
            settlement: ReservationSettlement {
                reservation_status: ReservationStatus::Failed,
                payment_status: PaymentStatus::Failed,
                payment_details: Some(PaymentDetails {
                    method: request.method,
                    order_id: request.order_id.clone(),
                    payment_id: request.payment_id.clone(),
                    amount: request.amount.clone(),
                    captured: false,
                    captured_at: None,
                    refunded: false,
                }),
                confirmed_at: None,
                cancelled_at: None,
            },
            resources: locks::release_op(reservation),
            ledger: Some(LedgerSettlement {
                order_id: request.order_id.clone(),
                captured: false,
                captured_at: None,
                payment_id: request.payment_id.clone(),
                display_name,
                refunded: false,
            }),
        }
    }
}
