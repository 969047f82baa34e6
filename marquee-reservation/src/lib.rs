pub mod error;
pub mod coordinator;
pub mod memory;

pub use error::{ErrorKind, PaymentRejection, ReservationError};
pub use coordinator::{PendingReservation, ReservationCoordinator, ReservationPolicy};
