use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::models::{NewTicket, SeatForSale, SeatStatus, SessionListing, Ticket, TicketDetails, TicketStatus};
use crate::CoreResult;

/// Result of the reservation transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Seat moved AVAILABLE → LOCKED and the PENDING ticket was inserted.
    Reserved(Ticket),
    /// The guarded seat update matched no row; nothing was written.
    SeatTaken(SeatStatus),
    /// The seat vanished between the read and the transaction.
    SeatMissing,
}

/// Result of the expiration transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// Ticket moved PENDING → CANCELED and its seat back to AVAILABLE.
    Expired { seat_id: Uuid },
    /// Ticket had already reached a terminal state; nothing was written.
    AlreadyResolved(TicketStatus),
    /// No such ticket.
    Missing,
}

/// Repository trait for the relational store backing reservations.
///
/// Every state transition is a guarded update: the row is written only if
/// its current status still matches, and the match count decides the outcome.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn find_seat(&self, seat_id: Uuid) -> CoreResult<Option<SeatForSale>>;

    /// Atomically lock an AVAILABLE seat and insert its PENDING ticket.
    async fn reserve_seat(&self, ticket: &NewTicket) -> CoreResult<ReserveOutcome>;

    /// Atomically move a PENDING ticket to PAID and its seat to SOLD.
    /// Returns `None` when the guarded ticket update matched zero rows.
    async fn pay_ticket(&self, ticket_id: Uuid) -> CoreResult<Option<Ticket>>;

    /// Atomically move a PENDING ticket to CANCELED and its seat to AVAILABLE.
    async fn expire_ticket(&self, ticket_id: Uuid) -> CoreResult<ExpireOutcome>;

    async fn find_ticket(&self, ticket_id: Uuid) -> CoreResult<Option<TicketDetails>>;

    async fn list_sessions(&self) -> CoreResult<Vec<SessionListing>>;

    /// PENDING tickets whose hold ended before `cutoff`, oldest first.
    async fn list_overdue_tickets(&self, cutoff: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Ticket>>;
}
