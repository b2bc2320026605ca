use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared::{CoreError, CustomerSnapshot, PaymentMethod, ReservationKind};

use crate::bookings::{BookingService, NewReservation};
use crate::gateway::PaymentIntents;
use crate::reconcile::{ReconcileRequest, ReconciliationEngine};
use crate::store::Store;

pub struct AppState<S: Store> {
    pub bookings: Arc<BookingService<S>>,
    pub intents: Arc<PaymentIntents<S>>,
    pub engine: Arc<ReconciliationEngine<S>>,
    pub store: Arc<S>,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            bookings: self.bookings.clone(),
            intents: self.intents.clone(),
            engine: self.engine.clone(),
            store: self.store.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub customer: CustomerSnapshot,
    pub kind: ReservationKind,
    pub method: PaymentMethod,
    pub amount: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct CreateReservationResponse {
    pub reservation_id: Uuid,
    pub order_id: String,
    pub receipt: Option<String>,
    pub amount: BigDecimal,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub order_id: String,
    pub payment_id: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct CancelReservationResponse {
    pub reservation_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn create_router<S: Store + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/reservations", post(create_reservation::<S>))
        .route("/reservations/:id/cancel", post(cancel_reservation::<S>))
        .route("/payments/verify", post(verify_payment::<S>))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn error_response(err: CoreError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        CoreError::ReservationNotFound(_)
        | CoreError::EventNotFound(_)
        | CoreError::ProductNotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_validation() => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse { error: err.to_string() }))
}

pub async fn create_reservation<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Json(request): Json<CreateReservationRequest>,
) -> Result<Json<CreateReservationResponse>, (StatusCode, Json<ErrorResponse>)> {
    let request = NewReservation {
        customer: request.customer,
        kind: request.kind,
        method: request.method,
        amount: request.amount,
    };
    match state.bookings.create_reservation(request).await {
        Ok((reservation, intent)) => Ok(Json(CreateReservationResponse {
            reservation_id: reservation.id,
            order_id: intent.order_id,
            receipt: intent.receipt,
            amount: reservation.amount,
            status: "pending".to_string(),
        })),
        Err(err) => {
            tracing::error!(%err, "failed to create reservation");
            Err(error_response(err))
        }
    }
}

/// Answers from the signature/ledger check alone; the settlement work runs
/// in the background. A client can see "verified" while resource commit is
/// still being retried.
pub async fn verify_payment<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, (StatusCode, Json<ErrorResponse>)> {
    let entry = state
        .store
        .ledger_entry(&request.order_id)
        .await
        .map_err(error_response)?;
    let Some(entry) = entry else {
        // no intent on record: nothing to settle, nothing to verify
        return Ok(Json(VerifyPaymentResponse { verified: false }));
    };

    let verified = state
        .intents
        .verify_completion(
            entry.method,
            &request.order_id,
            request.payment_id.as_deref(),
            request.signature.as_deref(),
        )
        .await
        .map_err(error_response)?;

    let reconcile_request = ReconcileRequest {
        reservation_id: entry.reservation_id,
        verified,
        amount: entry.amount.clone(),
        order_id: request.order_id.clone(),
        payment_id: request.payment_id.clone(),
        method: entry.method,
    };
    let engine = state.engine.clone();
    tokio::spawn(async move {
        engine.reconcile(reconcile_request).await;
    });

    Ok(Json(VerifyPaymentResponse { verified }))
}

pub async fn cancel_reservation<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelReservationResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.bookings.cancel_reservation(id).await {
        Ok(reservation) => Ok(Json(CancelReservationResponse {
            reservation_id: reservation.id,
            status: format!("{:?}", reservation.reservation_status).to_lowercase(),
        })),
        Err(err) => {
            tracing::error!(%err, reservation_id = %id, "failed to cancel reservation");
            Err(error_response(err))
        }
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}
