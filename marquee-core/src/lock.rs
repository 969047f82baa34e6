use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;
use crate::CoreResult;

/// Short-lived distributed mutex keyed by seat.
#[async_trait]
pub trait SeatLockStore: Send + Sync {
    /// Set-if-absent with expiry. `Ok(false)` means another holder owns the seat;
    /// it is never retried here.
    async fn acquire(&self, seat_id: Uuid, holder: &str, ttl: Duration) -> CoreResult<bool>;

    /// Remove the lock only if `holder` still owns it.
    async fn release(&self, seat_id: Uuid, holder: &str) -> CoreResult<()>;
}
