pub mod models;
pub mod repository;
pub mod lock;
pub mod publisher;

pub use models::{
    Movie, NewTicket, Seat, SeatForSale, SeatStatus, Session, SessionListing, Ticket, TicketDetails, TicketStatus,
};
pub use repository::{ExpireOutcome, ReservationRepository, ReserveOutcome};
pub use lock::SeatLockStore;
pub use publisher::ReservationEventPublisher;

/// Boxed error used to carry driver failures (sqlx, redis, rdkafka) through the core.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Relational store failure: {0}")]
    Store(#[source] BoxError),
    #[error("Lock store failure: {0}")]
    Lock(#[source] BoxError),
    #[error("Message channel failure: {0}")]
    Channel(#[source] BoxError),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl CoreError {
    pub fn store(err: impl Into<BoxError>) -> Self {
        Self::Store(err.into())
    }

    pub fn lock(err: impl Into<BoxError>) -> Self {
        Self::Lock(err.into())
    }

    pub fn channel(err: impl Into<BoxError>) -> Self {
        Self::Channel(err.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
