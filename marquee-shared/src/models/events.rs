use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Payload shared by the "created" and "expire" notifications.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReservationEvent {
    pub ticket_id: Uuid,
    pub seat_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ReservationPattern {
    #[serde(rename = "reservation.created")]
    Created,
    #[serde(rename = "reservation.expired")]
    Expired,
}

impl fmt::Display for ReservationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationPattern::Created => write!(f, "reservation.created"),
            ReservationPattern::Expired => write!(f, "reservation.expired"),
        }
    }
}

/// Envelope carried on the immediate reservations topic.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ReservationMessage {
    pub pattern: ReservationPattern,
    pub data: ReservationEvent,
}

impl ReservationMessage {
    pub fn created(data: ReservationEvent) -> Self {
        Self { pattern: ReservationPattern::Created, data }
    }

    pub fn expired(data: ReservationEvent) -> Self {
        Self { pattern: ReservationPattern::Expired, data }
    }
}

/// Envelope carried on the delay topic. The relay holds it until
/// `deliver_at` and then forwards `message` to the reservations topic.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DelayedMessage {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub deliver_at: DateTime<Utc>,
    pub message: ReservationMessage,
}
