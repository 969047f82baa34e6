use chrono::{DateTime, Utc};
use marquee_core::{
    ExpireOutcome, NewTicket, ReservationEventPublisher, ReservationRepository, ReserveOutcome, SeatForSale,
    SeatLockStore, SeatStatus, SessionListing, Ticket, TicketDetails, TicketStatus,
};
use marquee_shared::models::events::ReservationEvent;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::error::{PaymentRejection, ReservationError};

/// Tunables for the hold window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationPolicy {
    /// How long a seat stays LOCKED awaiting payment. Also the lock TTL.
    pub hold: Duration,
}

impl ReservationPolicy {
    pub fn from_seconds(hold_seconds: u64) -> Self {
        Self { hold: Duration::from_secs(hold_seconds) }
    }

    fn hold_delta(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.hold.as_millis() as i64)
    }
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self::from_seconds(30)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingReservation {
    pub message: String,
    pub ticket_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Drives the seat/ticket state machine across the lock store, the
/// relational store and the message channel.
pub struct ReservationCoordinator {
    repo: Arc<dyn ReservationRepository>,
    locks: Arc<dyn SeatLockStore>,
    events: Arc<dyn ReservationEventPublisher>,
    policy: ReservationPolicy,
}

impl ReservationCoordinator {
    pub fn new(
        repo: Arc<dyn ReservationRepository>,
        locks: Arc<dyn SeatLockStore>,
        events: Arc<dyn ReservationEventPublisher>,
        policy: ReservationPolicy,
    ) -> Self {
        Self { repo, locks, events, policy }
    }

    pub fn policy(&self) -> ReservationPolicy {
        self.policy
    }

    /// Hold `seat_id` for `user_id` until payment or expiry.
    pub async fn create_reservation(
        &self,
        seat_id: Uuid,
        user_id: Uuid,
    ) -> Result<PendingReservation, ReservationError> {
        // Fresh token per attempt so a release can only ever remove our own entry
        let holder = Uuid::new_v4().to_string();

        if !self.locks.acquire(seat_id, &holder, self.policy.hold).await? {
            info!("Seat {} is locked by another request", seat_id);
            return Err(ReservationError::SeatLocked(seat_id));
        }

        let reserved = self.reserve_locked(seat_id, user_id).await;

        // Seat.status = LOCKED keeps the hold from here on, not the mutex
        if let Err(e) = self.locks.release(seat_id, &holder).await {
            warn!("Failed to release lock for seat {}, TTL will clear it: {}", seat_id, e);
        }

        let ticket = reserved?;
        let event = ReservationEvent { ticket_id: ticket.id, seat_id };
        self.emit(&event).await;

        info!("Seat {} held for user {} with ticket {} until {}", seat_id, user_id, ticket.id, ticket.expires_at);

        Ok(PendingReservation {
            message: "Reservation held. Awaiting payment.".to_string(),
            ticket_id: ticket.id,
            expires_at: ticket.expires_at,
        })
    }

    async fn reserve_locked(&self, seat_id: Uuid, user_id: Uuid) -> Result<Ticket, ReservationError> {
        let SeatForSale { seat, price_cents } = self
            .repo
            .find_seat(seat_id)
            .await?
            .ok_or(ReservationError::SeatNotFound(seat_id))?;

        if seat.status != SeatStatus::Available {
            return Err(ReservationError::SeatUnavailable { seat_id, status: seat.status });
        }

        let new_ticket = NewTicket {
            id: Uuid::new_v4(),
            seat_id,
            user_id,
            price_cents,
            expires_at: Utc::now() + self.policy.hold_delta(),
        };

        // The guarded update inside the transaction is the authoritative check
        match self.repo.reserve_seat(&new_ticket).await? {
            ReserveOutcome::Reserved(ticket) => Ok(ticket),
            ReserveOutcome::SeatTaken(status) => Err(ReservationError::SeatUnavailable { seat_id, status }),
            ReserveOutcome::SeatMissing => Err(ReservationError::SeatNotFound(seat_id)),
        }
    }

    /// Best effort: the reservation is already committed.
    async fn emit(&self, event: &ReservationEvent) {
        if let Err(e) = self.events.publish_created(event).await {
            error!("Failed to publish reservation.created for ticket {}: {}", event.ticket_id, e);
        }

        if let Err(e) = self.events.schedule_expiration(event, self.policy.hold).await {
            error!(
                "Failed to schedule expiration for ticket {}, left to the overdue sweep: {}",
                event.ticket_id, e
            );
        }
    }

    /// PENDING → PAID, seat LOCKED → SOLD.
    pub async fn pay_ticket(&self, ticket_id: Uuid) -> Result<Ticket, ReservationError> {
        if let Some(ticket) = self.repo.pay_ticket(ticket_id).await? {
            info!("Ticket {} paid, seat {} sold", ticket.id, ticket.seat_id);
            return Ok(ticket);
        }

        let reason = match self.repo.find_ticket(ticket_id).await {
            Ok(None) => PaymentRejection::UnknownTicket,
            Ok(Some(details)) => match details.ticket.status {
                TicketStatus::Paid => PaymentRejection::AlreadyPaid,
                TicketStatus::Canceled => PaymentRejection::Expired,
                TicketStatus::Pending => PaymentRejection::NotPending,
            },
            Err(e) => {
                warn!("Could not classify rejected payment for ticket {}: {}", ticket_id, e);
                PaymentRejection::NotPending
            }
        };

        info!("Payment rejected for ticket {}: {}", ticket_id, reason);
        Err(ReservationError::PaymentRejected { ticket_id, reason })
    }

    /// Handle a delivered `reservation.expired` event. Idempotent.
    pub async fn expire_reservation(&self, event: &ReservationEvent) -> Result<ExpireOutcome, ReservationError> {
        let outcome = self.repo.expire_ticket(event.ticket_id).await?;

        match &outcome {
            ExpireOutcome::Expired { seat_id } => {
                if *seat_id != event.seat_id {
                    warn!(
                        "Expire event for ticket {} named seat {} but the ticket holds seat {}",
                        event.ticket_id, event.seat_id, seat_id
                    );
                }
                info!("Hold expired for ticket {}, seat {} released", event.ticket_id, seat_id);
            }
            ExpireOutcome::AlreadyResolved(status) => {
                debug!("Ticket {} already {}, ignoring expire event", event.ticket_id, status);
            }
            ExpireOutcome::Missing => {
                warn!("Expire event for unknown ticket {}, ignoring", event.ticket_id);
            }
        }

        Ok(outcome)
    }

    /// Expire PENDING tickets whose hold ended before `cutoff`. Covers
    /// reservations whose delayed expire event was never published.
    pub async fn sweep_overdue(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<usize, ReservationError> {
        let overdue = self.repo.list_overdue_tickets(cutoff, limit).await?;
        let mut released = 0;

        for ticket in overdue {
            let event = ReservationEvent { ticket_id: ticket.id, seat_id: ticket.seat_id };
            match self.expire_reservation(&event).await {
                Ok(ExpireOutcome::Expired { .. }) => released += 1,
                Ok(_) => {}
                Err(e) => error!("Sweep failed to expire ticket {}: {}", ticket.id, e),
            }
        }

        if released > 0 {
            info!("Overdue sweep released {} seats", released);
        }
        Ok(released)
    }

    pub async fn get_ticket(&self, ticket_id: Uuid) -> Result<TicketDetails, ReservationError> {
        self.repo
            .find_ticket(ticket_id)
            .await?
            .ok_or(ReservationError::TicketNotFound(ticket_id))
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionListing>, ReservationError> {
        Ok(self.repo.list_sessions().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::{InMemoryReservationStore, InMemorySeatLocks, RecordingPublisher};

    struct Harness {
        store: Arc<InMemoryReservationStore>,
        locks: Arc<InMemorySeatLocks>,
        events: Arc<RecordingPublisher>,
        coordinator: Arc<ReservationCoordinator>,
        seat_id: Uuid,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryReservationStore::new());
        let locks = Arc::new(InMemorySeatLocks::new());
        let events = Arc::new(RecordingPublisher::new());
        let showing = store.add_showing("Race Conditions", 5000, Utc::now(), &["A"], 2).await;

        let coordinator = Arc::new(ReservationCoordinator::new(
            store.clone(),
            locks.clone(),
            events.clone(),
            ReservationPolicy::default(),
        ));

        Harness { store, locks, events, coordinator, seat_id: showing.seats[0].id }
    }

    #[tokio::test]
    async fn test_reservation_locks_seat_and_schedules_expiry() {
        let h = harness().await;
        let user_id = Uuid::new_v4();
        let before = Utc::now();

        let pending = h.coordinator.create_reservation(h.seat_id, user_id).await.unwrap();

        let ticket = h.store.ticket(pending.ticket_id).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Pending);
        assert_eq!(ticket.user_id, user_id);
        assert_eq!(ticket.price_cents, 5000);
        assert!(pending.expires_at >= before + chrono::Duration::seconds(30));
        assert_eq!(h.store.seat(h.seat_id).await.unwrap().status, SeatStatus::Locked);

        let event = ReservationEvent { ticket_id: pending.ticket_id, seat_id: h.seat_id };
        assert_eq!(h.events.created().await, vec![event]);
        assert_eq!(h.events.scheduled().await, vec![(event, Duration::from_secs(30))]);

        // Mutex is handed back right after commit
        assert!(h.locks.holder(h.seat_id).await.is_none());
    }

    #[tokio::test]
    async fn test_held_lock_is_conflict_without_touching_store() {
        let h = harness().await;
        h.locks.acquire(h.seat_id, "other-instance", Duration::from_secs(30)).await.unwrap();

        let err = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap_err();

        assert!(matches!(err, ReservationError::SeatLocked(id) if id == h.seat_id));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(h.store.tickets_for_seat(h.seat_id).await.is_empty());
        // Someone else's lock survives
        assert_eq!(h.locks.holder(h.seat_id).await.as_deref(), Some("other-instance"));
    }

    #[tokio::test]
    async fn test_unknown_seat_is_not_found_and_releases_lock() {
        let h = harness().await;
        let missing = Uuid::new_v4();

        let err = h.coordinator.create_reservation(missing, Uuid::new_v4()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(h.locks.holder(missing).await.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_and_releases_lock() {
        let h = harness().await;
        h.store.fail_next_transaction();

        let err = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(h.locks.holder(h.seat_id).await.is_none());
        assert_eq!(h.store.seat(h.seat_id).await.unwrap().status, SeatStatus::Available);
        assert!(h.events.created().await.is_empty());

        // Nothing leaked: the next attempt goes through
        h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_emission_failure_keeps_reservation() {
        let h = harness().await;
        h.events.set_failing(true);

        let pending = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();

        assert_eq!(h.store.ticket(pending.ticket_id).await.unwrap().status, TicketStatus::Pending);
        assert_eq!(h.store.seat(h.seat_id).await.unwrap().status, SeatStatus::Locked);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_single_winner() {
        let h = harness().await;

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = h.coordinator.clone();
                let seat_id = h.seat_id;
                tokio::spawn(async move { coordinator.create_reservation(seat_id, Uuid::new_v4()).await })
            })
            .collect();

        let mut won = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => won += 1,
                Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
            }
        }

        assert_eq!(won, 1);
        assert_eq!(h.store.tickets_for_seat(h.seat_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_pay_twice_sells_once() {
        let h = harness().await;
        let pending = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();

        let paid = h.coordinator.pay_ticket(pending.ticket_id).await.unwrap();
        assert_eq!(paid.status, TicketStatus::Paid);

        let err = h.coordinator.pay_ticket(pending.ticket_id).await.unwrap_err();
        assert!(matches!(
            err,
            ReservationError::PaymentRejected { reason: PaymentRejection::AlreadyPaid, .. }
        ));
        assert_eq!(h.store.seat(h.seat_id).await.unwrap().status, SeatStatus::Sold);
    }

    #[tokio::test]
    async fn test_pay_unknown_ticket_is_distinguishable() {
        let h = harness().await;

        let err = h.coordinator.pay_ticket(Uuid::new_v4()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.reason(), Some("unknown_ticket"));
    }

    #[tokio::test]
    async fn test_sold_seat_cannot_be_reserved_again() {
        let h = harness().await;
        let pending = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();
        h.coordinator.pay_ticket(pending.ticket_id).await.unwrap();

        let err = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap_err();

        assert!(matches!(err, ReservationError::SeatUnavailable { status: SeatStatus::Sold, .. }));
        assert!(err.to_string().contains("already SOLD"));
    }

    #[tokio::test]
    async fn test_expiry_releases_seat_for_next_user() {
        let h = harness().await;
        let pending = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();
        let event = ReservationEvent { ticket_id: pending.ticket_id, seat_id: h.seat_id };

        let outcome = h.coordinator.expire_reservation(&event).await.unwrap();

        assert_eq!(outcome, ExpireOutcome::Expired { seat_id: h.seat_id });
        assert_eq!(h.store.ticket(pending.ticket_id).await.unwrap().status, TicketStatus::Canceled);
        assert_eq!(h.store.seat(h.seat_id).await.unwrap().status, SeatStatus::Available);

        h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_expiry_is_noop() {
        let h = harness().await;
        let pending = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();
        let event = ReservationEvent { ticket_id: pending.ticket_id, seat_id: h.seat_id };
        h.coordinator.expire_reservation(&event).await.unwrap();

        // Seat taken by someone else after the first expiry
        let next = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();

        for _ in 0..2 {
            let outcome = h.coordinator.expire_reservation(&event).await.unwrap();
            assert_eq!(outcome, ExpireOutcome::AlreadyResolved(TicketStatus::Canceled));
        }
        assert_eq!(h.store.seat(h.seat_id).await.unwrap().status, SeatStatus::Locked);
        assert_eq!(h.store.ticket(next.ticket_id).await.unwrap().status, TicketStatus::Pending);
    }

    #[tokio::test]
    async fn test_expiry_after_payment_is_noop() {
        let h = harness().await;
        let pending = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();
        h.coordinator.pay_ticket(pending.ticket_id).await.unwrap();
        let event = ReservationEvent { ticket_id: pending.ticket_id, seat_id: h.seat_id };

        for _ in 0..2 {
            let outcome = h.coordinator.expire_reservation(&event).await.unwrap();
            assert_eq!(outcome, ExpireOutcome::AlreadyResolved(TicketStatus::Paid));
        }
        assert_eq!(h.store.seat(h.seat_id).await.unwrap().status, SeatStatus::Sold);
    }

    #[tokio::test]
    async fn test_expiry_for_unknown_ticket_is_tolerated() {
        let h = harness().await;
        let event = ReservationEvent { ticket_id: Uuid::new_v4(), seat_id: h.seat_id };

        assert_eq!(h.coordinator.expire_reservation(&event).await.unwrap(), ExpireOutcome::Missing);
        assert_eq!(h.store.seat(h.seat_id).await.unwrap().status, SeatStatus::Available);
    }

    #[tokio::test]
    async fn test_payment_after_expiry_is_rejected() {
        let h = harness().await;
        let pending = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();
        h.coordinator
            .expire_reservation(&ReservationEvent { ticket_id: pending.ticket_id, seat_id: h.seat_id })
            .await
            .unwrap();

        let err = h.coordinator.pay_ticket(pending.ticket_id).await.unwrap_err();

        assert_eq!(err.reason(), Some("expired"));
        assert_eq!(h.store.seat(h.seat_id).await.unwrap().status, SeatStatus::Available);
    }

    #[tokio::test]
    async fn test_second_user_waits_for_expiry() {
        let h = harness().await;
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        let held = h.coordinator.create_reservation(h.seat_id, user_a).await.unwrap();

        let err = h.coordinator.create_reservation(h.seat_id, user_b).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        h.coordinator
            .expire_reservation(&ReservationEvent { ticket_id: held.ticket_id, seat_id: h.seat_id })
            .await
            .unwrap();

        let retry = h.coordinator.create_reservation(h.seat_id, user_b).await.unwrap();
        assert_eq!(h.store.ticket(retry.ticket_id).await.unwrap().user_id, user_b);
    }

    #[tokio::test]
    async fn test_sweep_expires_only_overdue_pending_tickets() {
        let h = harness().await;
        let showing = h.coordinator.list_sessions().await.unwrap();
        let other_seat = showing[0].seats[1].id;

        let stale = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();
        let paid = h.coordinator.create_reservation(other_seat, Uuid::new_v4()).await.unwrap();
        h.coordinator.pay_ticket(paid.ticket_id).await.unwrap();

        // Nothing is overdue yet
        assert_eq!(h.coordinator.sweep_overdue(Utc::now(), 100).await.unwrap(), 0);

        let released = h
            .coordinator
            .sweep_overdue(Utc::now() + chrono::Duration::minutes(5), 100)
            .await
            .unwrap();

        assert_eq!(released, 1);
        assert_eq!(h.store.ticket(stale.ticket_id).await.unwrap().status, TicketStatus::Canceled);
        assert_eq!(h.store.seat(h.seat_id).await.unwrap().status, SeatStatus::Available);
        assert_eq!(h.store.seat(other_seat).await.unwrap().status, SeatStatus::Sold);
    }

    #[tokio::test]
    async fn test_get_ticket_includes_seat() {
        let h = harness().await;
        let pending = h.coordinator.create_reservation(h.seat_id, Uuid::new_v4()).await.unwrap();

        let details = h.coordinator.get_ticket(pending.ticket_id).await.unwrap();
        assert_eq!(details.seat.id, h.seat_id);
        assert_eq!(details.seat.status, SeatStatus::Locked);

        let err = h.coordinator.get_ticket(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
