use marquee_core::{CoreError, SeatStatus};
use std::fmt;
use uuid::Uuid;

/// Coarse classification callers map onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    Internal,
}

/// Why a payment was refused. All causes are conflicts; the distinction comes
/// from a diagnostic read after the guarded update matched nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentRejection {
    UnknownTicket,
    AlreadyPaid,
    Expired,
    /// The diagnostic read could not classify the rejection.
    NotPending,
}

impl PaymentRejection {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentRejection::UnknownTicket => "unknown_ticket",
            PaymentRejection::AlreadyPaid => "already_paid",
            PaymentRejection::Expired => "expired",
            PaymentRejection::NotPending => "not_pending",
        }
    }
}

impl fmt::Display for PaymentRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentRejection::UnknownTicket => write!(f, "the reservation does not exist"),
            PaymentRejection::AlreadyPaid => write!(f, "the ticket was already paid"),
            PaymentRejection::Expired => write!(f, "the reservation hold expired"),
            PaymentRejection::NotPending => write!(f, "the ticket is no longer pending"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("Seat {0} is being reserved by another user. Try again shortly.")]
    SeatLocked(Uuid),

    #[error("Seat {seat_id} is already {status}.")]
    SeatUnavailable {
        seat_id: Uuid,
        status: SeatStatus,
    },

    #[error("Seat {0} not found.")]
    SeatNotFound(Uuid),

    #[error("Ticket {0} not found.")]
    TicketNotFound(Uuid),

    #[error("Payment rejected: {reason}.")]
    PaymentRejected {
        ticket_id: Uuid,
        reason: PaymentRejection,
    },

    #[error(transparent)]
    Internal(#[from] CoreError),
}

impl ReservationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReservationError::SeatLocked(_)
            | ReservationError::SeatUnavailable { .. }
            | ReservationError::PaymentRejected { .. } => ErrorKind::Conflict,
            ReservationError::SeatNotFound(_) | ReservationError::TicketNotFound(_) => ErrorKind::NotFound,
            ReservationError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Machine-readable reason for conflicts
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            ReservationError::SeatLocked(_) => Some("seat_locked"),
            ReservationError::SeatUnavailable { status: SeatStatus::Sold, .. } => Some("seat_sold"),
            ReservationError::SeatUnavailable { .. } => Some("seat_unavailable"),
            ReservationError::PaymentRejected { reason, .. } => Some(reason.code()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let seat_id = Uuid::new_v4();
        assert_eq!(ReservationError::SeatLocked(seat_id).kind(), ErrorKind::Conflict);
        assert_eq!(
            ReservationError::SeatUnavailable { seat_id, status: SeatStatus::Sold }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(ReservationError::SeatNotFound(seat_id).kind(), ErrorKind::NotFound);
        assert_eq!(
            ReservationError::Internal(CoreError::store("connection reset")).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_unavailable_message_names_status() {
        let err = ReservationError::SeatUnavailable { seat_id: Uuid::nil(), status: SeatStatus::Sold };
        assert!(err.to_string().ends_with("is already SOLD."));
        assert_eq!(err.reason(), Some("seat_sold"));
    }

    #[test]
    fn test_payment_rejection_reasons_are_distinct() {
        let unknown = ReservationError::PaymentRejected {
            ticket_id: Uuid::nil(),
            reason: PaymentRejection::UnknownTicket,
        };
        let paid = ReservationError::PaymentRejected {
            ticket_id: Uuid::nil(),
            reason: PaymentRejection::AlreadyPaid,
        };

        assert_eq!(unknown.kind(), paid.kind());
        assert_ne!(unknown.reason(), paid.reason());
    }
}
