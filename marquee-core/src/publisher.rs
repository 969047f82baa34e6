use async_trait::async_trait;
use marquee_shared::models::events::ReservationEvent;
use std::time::Duration;
use crate::CoreResult;

/// Outbound side of the message channel.
///
/// Delivery is at-least-once: consumers must tolerate duplicates.
#[async_trait]
pub trait ReservationEventPublisher: Send + Sync {
    /// Publish `reservation.created` on the immediate queue.
    async fn publish_created(&self, event: &ReservationEvent) -> CoreResult<()>;

    /// Publish `reservation.expired` so it reaches the immediate queue after `delay`.
    async fn schedule_expiration(&self, event: &ReservationEvent, delay: Duration) -> CoreResult<()>;
}
