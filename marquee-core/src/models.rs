use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use crate::CoreError;

/// Seat status in the reservation lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Locked,
    Sold,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Locked => "LOCKED",
            SeatStatus::Sold => "SOLD",
        }
    }

    /// AVAILABLE → LOCKED (reserve), LOCKED → SOLD (pay), LOCKED → AVAILABLE (expire)
    pub fn can_transition_to(&self, next: SeatStatus) -> bool {
        matches!(
            (self, next),
            (SeatStatus::Available, SeatStatus::Locked)
                | (SeatStatus::Locked, SeatStatus::Sold)
                | (SeatStatus::Locked, SeatStatus::Available)
        )
    }

    /// The seat status that must accompany the seat's latest non-canceled ticket.
    pub fn for_ticket(ticket: Option<TicketStatus>) -> SeatStatus {
        match ticket {
            Some(TicketStatus::Pending) => SeatStatus::Locked,
            Some(TicketStatus::Paid) => SeatStatus::Sold,
            Some(TicketStatus::Canceled) | None => SeatStatus::Available,
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "LOCKED" => Ok(SeatStatus::Locked),
            "SOLD" => Ok(SeatStatus::Sold),
            other => Err(CoreError::Corrupt(format!("unknown seat status {other}"))),
        }
    }
}

/// Ticket status. PAID and CANCELED are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Pending,
    Paid,
    Canceled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "PENDING",
            TicketStatus::Paid => "PAID",
            TicketStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TicketStatus::Pending)
    }

    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Pending, TicketStatus::Paid) | (TicketStatus::Pending, TicketStatus::Canceled)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TicketStatus::Pending),
            "PAID" => Ok(TicketStatus::Paid),
            "CANCELED" => Ok(TicketStatus::Canceled),
            other => Err(CoreError::Corrupt(format!("unknown ticket status {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// Running time in minutes
    pub duration: i32,
}

/// A scheduled showing of a movie
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub movie_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: Uuid,
    pub session_id: Uuid,
    pub row: String,
    pub number: i32,
    pub status: SeatStatus,
}

/// A seat together with the price of its session, as read before reserving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatForSale {
    pub seat: Seat,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub seat_id: Uuid,
    pub user_id: Uuid,
    pub price_cents: i64,
    pub status: TicketStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for the reservation transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub id: Uuid,
    pub seat_id: Uuid,
    pub user_id: Uuid,
    pub price_cents: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TicketDetails {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub seat: Seat,
}

/// Session listing entry: the showing, its movie, and its seats ordered by row then number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionListing {
    #[serde(flatten)]
    pub session: Session,
    pub movie: Movie,
    pub seats: Vec<Seat>,
}
