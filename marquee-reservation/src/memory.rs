//! In-memory stand-ins for the relational store, the lock store and the
//! message channel. Each operation runs under one mutex, which gives the same
//! all-or-nothing behaviour as a database transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::{
    CoreError, CoreResult, ExpireOutcome, Movie, NewTicket, ReservationEventPublisher, ReservationRepository,
    ReserveOutcome, Seat, SeatForSale, SeatLockStore, SeatStatus, Session, SessionListing, Ticket, TicketDetails,
    TicketStatus,
};
use marquee_shared::models::events::ReservationEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct StoreState {
    movies: HashMap<Uuid, Movie>,
    sessions: HashMap<Uuid, Session>,
    seats: HashMap<Uuid, Seat>,
    tickets: HashMap<Uuid, Ticket>,
}

impl StoreState {
    /// UPDATE seats SET status = next WHERE id = seat_id AND status = expected
    fn update_seat_if(&mut self, seat_id: Uuid, expected: SeatStatus, next: SeatStatus) -> CoreResult<bool> {
        match self.seats.get_mut(&seat_id) {
            Some(seat) if seat.status == expected => {
                if !expected.can_transition_to(next) {
                    return Err(CoreError::Corrupt(format!("illegal seat transition {expected} -> {next}")));
                }
                seat.status = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// UPDATE tickets SET status = next WHERE id = ticket_id AND status = expected RETURNING *
    fn update_ticket_if(
        &mut self,
        ticket_id: Uuid,
        expected: TicketStatus,
        next: TicketStatus,
    ) -> CoreResult<Option<Ticket>> {
        match self.tickets.get_mut(&ticket_id) {
            Some(ticket) if ticket.status == expected => {
                if !expected.can_transition_to(next) {
                    return Err(CoreError::Corrupt(format!("illegal ticket transition {expected} -> {next}")));
                }
                ticket.status = next;
                ticket.updated_at = Utc::now();
                Ok(Some(ticket.clone()))
            }
            _ => Ok(None),
        }
    }
}

/// Relational store kept in process memory
#[derive(Default)]
pub struct InMemoryReservationStore {
    state: Mutex<StoreState>,
    fail_next: AtomicBool,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a movie, one session and `rows × seats_per_row` AVAILABLE seats.
    pub async fn add_showing(
        &self,
        title: &str,
        price_cents: i64,
        starts_at: DateTime<Utc>,
        rows: &[&str],
        seats_per_row: i32,
    ) -> SessionListing {
        let movie = Movie {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: String::new(),
            duration: 120,
        };
        let session = Session {
            id: Uuid::new_v4(),
            movie_id: movie.id,
            starts_at,
            price_cents,
        };
        let mut seats = Vec::new();
        for row in rows {
            for number in 1..=seats_per_row {
                seats.push(Seat {
                    id: Uuid::new_v4(),
                    session_id: session.id,
                    row: row.to_string(),
                    number,
                    status: SeatStatus::Available,
                });
            }
        }

        let mut state = self.state.lock().await;
        state.movies.insert(movie.id, movie.clone());
        state.sessions.insert(session.id, session.clone());
        for seat in &seats {
            state.seats.insert(seat.id, seat.clone());
        }

        SessionListing { session, movie, seats }
    }

    pub async fn seat(&self, seat_id: Uuid) -> Option<Seat> {
        self.state.lock().await.seats.get(&seat_id).cloned()
    }

    pub async fn ticket(&self, ticket_id: Uuid) -> Option<Ticket> {
        self.state.lock().await.tickets.get(&ticket_id).cloned()
    }

    pub async fn tickets_for_seat(&self, seat_id: Uuid) -> Vec<Ticket> {
        let state = self.state.lock().await;
        let mut tickets: Vec<Ticket> = state.tickets.values().filter(|t| t.seat_id == seat_id).cloned().collect();
        tickets.sort_by_key(|t| t.created_at);
        tickets
    }

    /// Make the next transactional write fail before touching any row.
    pub fn fail_next_transaction(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check_injected_failure(&self) -> CoreResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CoreError::store("simulated transaction failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ReservationRepository for InMemoryReservationStore {
    async fn find_seat(&self, seat_id: Uuid) -> CoreResult<Option<SeatForSale>> {
        let state = self.state.lock().await;
        let Some(seat) = state.seats.get(&seat_id) else {
            return Ok(None);
        };
        let session = state
            .sessions
            .get(&seat.session_id)
            .ok_or_else(|| CoreError::Corrupt(format!("seat {seat_id} has no session")))?;

        Ok(Some(SeatForSale { seat: seat.clone(), price_cents: session.price_cents }))
    }

    async fn reserve_seat(&self, ticket: &NewTicket) -> CoreResult<ReserveOutcome> {
        let mut state = self.state.lock().await;
        self.check_injected_failure()?;

        if !state.update_seat_if(ticket.seat_id, SeatStatus::Available, SeatStatus::Locked)? {
            return Ok(match state.seats.get(&ticket.seat_id) {
                Some(seat) => ReserveOutcome::SeatTaken(seat.status),
                None => ReserveOutcome::SeatMissing,
            });
        }

        let now = Utc::now();
        let created = Ticket {
            id: ticket.id,
            seat_id: ticket.seat_id,
            user_id: ticket.user_id,
            price_cents: ticket.price_cents,
            status: TicketStatus::Pending,
            expires_at: ticket.expires_at,
            created_at: now,
            updated_at: now,
        };
        state.tickets.insert(created.id, created.clone());

        Ok(ReserveOutcome::Reserved(created))
    }

    async fn pay_ticket(&self, ticket_id: Uuid) -> CoreResult<Option<Ticket>> {
        let mut state = self.state.lock().await;
        self.check_injected_failure()?;

        let Some(ticket) = state.update_ticket_if(ticket_id, TicketStatus::Pending, TicketStatus::Paid)? else {
            return Ok(None);
        };
        state.update_seat_if(ticket.seat_id, SeatStatus::Locked, SeatStatus::Sold)?;

        Ok(Some(ticket))
    }

    async fn expire_ticket(&self, ticket_id: Uuid) -> CoreResult<ExpireOutcome> {
        let mut state = self.state.lock().await;
        self.check_injected_failure()?;

        match state.update_ticket_if(ticket_id, TicketStatus::Pending, TicketStatus::Canceled)? {
            Some(ticket) => {
                state.update_seat_if(ticket.seat_id, SeatStatus::Locked, SeatStatus::Available)?;
                Ok(ExpireOutcome::Expired { seat_id: ticket.seat_id })
            }
            None => Ok(match state.tickets.get(&ticket_id) {
                Some(ticket) => ExpireOutcome::AlreadyResolved(ticket.status),
                None => ExpireOutcome::Missing,
            }),
        }
    }

    async fn find_ticket(&self, ticket_id: Uuid) -> CoreResult<Option<TicketDetails>> {
        let state = self.state.lock().await;
        let Some(ticket) = state.tickets.get(&ticket_id) else {
            return Ok(None);
        };
        let seat = state
            .seats
            .get(&ticket.seat_id)
            .ok_or_else(|| CoreError::Corrupt(format!("ticket {ticket_id} has no seat")))?;

        Ok(Some(TicketDetails { ticket: ticket.clone(), seat: seat.clone() }))
    }

    async fn list_sessions(&self) -> CoreResult<Vec<SessionListing>> {
        let state = self.state.lock().await;
        let mut listings = Vec::new();

        for session in state.sessions.values() {
            let movie = state
                .movies
                .get(&session.movie_id)
                .ok_or_else(|| CoreError::Corrupt(format!("session {} has no movie", session.id)))?;
            let mut seats: Vec<Seat> = state.seats.values().filter(|s| s.session_id == session.id).cloned().collect();
            seats.sort_by(|a, b| a.row.cmp(&b.row).then(a.number.cmp(&b.number)));

            listings.push(SessionListing { session: session.clone(), movie: movie.clone(), seats });
        }
        listings.sort_by_key(|l| l.session.starts_at);

        Ok(listings)
    }

    async fn list_overdue_tickets(&self, cutoff: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Ticket>> {
        let state = self.state.lock().await;
        let mut overdue: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.status == TicketStatus::Pending && t.expires_at < cutoff)
            .cloned()
            .collect();
        overdue.sort_by_key(|t| t.expires_at);
        overdue.truncate(limit.max(0) as usize);

        Ok(overdue)
    }
}

struct LockEntry {
    holder: String,
    expires_at: Instant,
}

/// Lock store with per-key expiry, checked lazily on access
#[derive(Default)]
pub struct InMemorySeatLocks {
    entries: Mutex<HashMap<Uuid, LockEntry>>,
}

impl InMemorySeatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn holder(&self, seat_id: Uuid) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(&seat_id)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.holder.clone())
    }
}

#[async_trait]
impl SeatLockStore for InMemorySeatLocks {
    async fn acquire(&self, seat_id: Uuid, holder: &str, ttl: Duration) -> CoreResult<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if let Some(entry) = entries.get(&seat_id) {
            if entry.expires_at > now {
                return Ok(false);
            }
        }
        entries.insert(seat_id, LockEntry { holder: holder.to_string(), expires_at: now + ttl });

        Ok(true)
    }

    async fn release(&self, seat_id: Uuid, holder: &str) -> CoreResult<()> {
        let mut entries = self.entries.lock().await;
        if entries.get(&seat_id).is_some_and(|e| e.holder == holder) {
            entries.remove(&seat_id);
        }
        Ok(())
    }
}

/// Publisher that records what would have been sent
#[derive(Default)]
pub struct RecordingPublisher {
    created: Mutex<Vec<ReservationEvent>>,
    scheduled: Mutex<Vec<(ReservationEvent, Duration)>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish returns a channel error while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn created(&self) -> Vec<ReservationEvent> {
        self.created.lock().await.clone()
    }

    pub async fn scheduled(&self) -> Vec<(ReservationEvent, Duration)> {
        self.scheduled.lock().await.clone()
    }

    fn check_failing(&self) -> CoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::channel("broker unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ReservationEventPublisher for RecordingPublisher {
    async fn publish_created(&self, event: &ReservationEvent) -> CoreResult<()> {
        self.check_failing()?;
        self.created.lock().await.push(*event);
        Ok(())
    }

    async fn schedule_expiration(&self, event: &ReservationEvent, delay: Duration) -> CoreResult<()> {
        self.check_failing()?;
        self.scheduled.lock().await.push((*event, delay));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive_until_expiry() {
        let locks = InMemorySeatLocks::new();
        let seat_id = Uuid::new_v4();

        assert!(locks.acquire(seat_id, "a", Duration::from_millis(30)).await.unwrap());
        assert!(!locks.acquire(seat_id, "b", Duration::from_millis(30)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;

        // Expired entry no longer blocks
        assert!(locks.acquire(seat_id, "b", Duration::from_secs(30)).await.unwrap());
        assert_eq!(locks.holder(seat_id).await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_release_ignores_foreign_holder() {
        let locks = InMemorySeatLocks::new();
        let seat_id = Uuid::new_v4();

        locks.acquire(seat_id, "owner", Duration::from_secs(30)).await.unwrap();
        locks.release(seat_id, "intruder").await.unwrap();
        assert_eq!(locks.holder(seat_id).await.as_deref(), Some("owner"));

        locks.release(seat_id, "owner").await.unwrap();
        assert!(locks.holder(seat_id).await.is_none());
    }

    #[tokio::test]
    async fn test_guarded_reserve_rejects_locked_seat() {
        let store = InMemoryReservationStore::new();
        let showing = store.add_showing("Test", 5000, Utc::now(), &["A"], 1).await;
        let seat_id = showing.seats[0].id;

        let new_ticket = |id| NewTicket {
            id,
            seat_id,
            user_id: Uuid::new_v4(),
            price_cents: 5000,
            expires_at: Utc::now(),
        };

        let first = store.reserve_seat(&new_ticket(Uuid::new_v4())).await.unwrap();
        assert!(matches!(first, ReserveOutcome::Reserved(_)));

        let second_id = Uuid::new_v4();
        let second = store.reserve_seat(&new_ticket(second_id)).await.unwrap();
        assert_eq!(second, ReserveOutcome::SeatTaken(SeatStatus::Locked));
        assert!(store.ticket(second_id).await.is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_writes_nothing() {
        let store = InMemoryReservationStore::new();
        let showing = store.add_showing("Test", 5000, Utc::now(), &["A"], 1).await;
        let seat_id = showing.seats[0].id;

        store.fail_next_transaction();
        let result = store
            .reserve_seat(&NewTicket {
                id: Uuid::new_v4(),
                seat_id,
                user_id: Uuid::new_v4(),
                price_cents: 5000,
                expires_at: Utc::now(),
            })
            .await;

        assert!(matches!(result, Err(CoreError::Store(_))));
        assert_eq!(store.seat(seat_id).await.unwrap().status, SeatStatus::Available);
        assert!(store.tickets_for_seat(seat_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_list_seats_in_row_order() {
        let store = InMemoryReservationStore::new();
        store.add_showing("Test", 5000, Utc::now(), &["B", "A"], 3).await;

        let listings = store.list_sessions().await.unwrap();
        let labels: Vec<String> = listings[0].seats.iter().map(|s| format!("{}{}", s.row, s.number)).collect();
        assert_eq!(labels, vec!["A1", "A2", "A3", "B1", "B2", "B3"]);
    }
}
