use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use marquee_core::{SessionListing, Ticket, TicketDetails};
use marquee_reservation::PendingReservation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/reservations", get(list_sessions).post(create_reservation))
        .route("/api/v1/reservations/ticket/{id}", get(get_ticket))
        .route("/api/v1/reservations/ticket/{id}/pay", patch(pay_ticket))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateReservationRequest {
    pub seat_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub message: String,
    pub ticket: Ticket,
}

fn ticket_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, AppError> {
    path.map(|Path(id)| id)
        .map_err(|e| AppError::ValidationError(e.body_text()))
}

/// POST /api/v1/reservations
async fn create_reservation(
    State(state): State<AppState>,
    payload: Result<Json<CreateReservationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PendingReservation>), AppError> {
    let Json(req) = payload.map_err(|e| AppError::ValidationError(e.body_text()))?;

    let result = state.coordinator.create_reservation(req.seat_id, req.user_id).await;
    state.metrics.observe("create", &result);

    Ok((StatusCode::CREATED, Json(result?)))
}

/// PATCH /api/v1/reservations/ticket/:id/pay
async fn pay_ticket(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<PaymentResponse>, AppError> {
    let id = ticket_id(path)?;

    let result = state.coordinator.pay_ticket(id).await;
    state.metrics.observe("pay", &result);

    Ok(Json(PaymentResponse {
        message: "Payment approved. Seat secured.".to_string(),
        ticket: result?,
    }))
}

/// GET /api/v1/reservations/ticket/:id
async fn get_ticket(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<TicketDetails>, AppError> {
    let id = ticket_id(path)?;
    Ok(Json(state.coordinator.get_ticket(id).await?))
}

/// GET /api/v1/reservations
///
/// Every session with its movie and seats, seats ordered by row then number.
async fn list_sessions(State(state): State<AppState>) -> Result<Json<Vec<SessionListing>>, AppError> {
    Ok(Json(state.coordinator.list_sessions().await?))
}
