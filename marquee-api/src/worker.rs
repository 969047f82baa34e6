use chrono::{DateTime, Utc};
use marquee_core::ExpireOutcome;
use marquee_reservation::{ErrorKind, ReservationCoordinator, ReservationError};
use marquee_shared::models::events::{DelayedMessage, ReservationMessage, ReservationPattern};
use marquee_store::app_config::{KafkaConfig, ReservationRules};
use marquee_store::EventProducer;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use crate::metrics::Metrics;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

fn subscribe(brokers: &str, group_id: &str, topic: &str) -> Result<StreamConsumer, KafkaError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        // Offsets are committed only after a message is handled
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;

    consumer.subscribe(&[topic])?;
    Ok(consumer)
}

/// Apply one reservation envelope. `reservation.created` is only logged.
pub async fn dispatch(
    coordinator: &ReservationCoordinator,
    message: &ReservationMessage,
) -> Result<Option<ExpireOutcome>, ReservationError> {
    match message.pattern {
        ReservationPattern::Created => {
            info!(
                "Reservation created: ticket {} holds seat {}",
                message.data.ticket_id, message.data.seat_id
            );
            Ok(None)
        }
        ReservationPattern::Expired => coordinator.expire_reservation(&message.data).await.map(Some),
    }
}

/// Decode and apply a raw payload from the reservations topic.
///
/// Malformed payloads are skipped. Store failures are retried with
/// doubling backoff; the last error is returned once attempts run out.
pub async fn handle_reservation_message(
    coordinator: &ReservationCoordinator,
    metrics: &Metrics,
    payload: &str,
) -> Result<(), ReservationError> {
    let message: ReservationMessage = match serde_json::from_str(payload) {
        Ok(m) => m,
        Err(e) => {
            warn!("Skipping malformed reservation message: {}", e);
            metrics.record("consume", "malformed");
            return Ok(());
        }
    };

    let mut backoff = RETRY_BACKOFF;
    let mut attempt = 1;
    loop {
        match dispatch(coordinator, &message).await {
            Ok(outcome) => {
                let label = match outcome {
                    None => "created",
                    Some(ExpireOutcome::Expired { .. }) => "expired",
                    Some(ExpireOutcome::AlreadyResolved(_)) => "already_resolved",
                    Some(ExpireOutcome::Missing) => "missing",
                };
                metrics.record("consume", label);
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::Internal && attempt < MAX_ATTEMPTS => {
                warn!(
                    "Handling {} for ticket {} failed (attempt {}/{}): {}",
                    message.pattern, message.data.ticket_id, attempt, MAX_ATTEMPTS, e
                );
                sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => {
                metrics.record("consume", "failed");
                return Err(e);
            }
        }
    }
}

pub async fn start_reservation_worker(
    kafka: KafkaConfig,
    coordinator: Arc<ReservationCoordinator>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), KafkaError> {
    let consumer = subscribe(&kafka.brokers, &kafka.group_id, &kafka.reservations_topic)?;

    info!("Reservation worker started, listening to {}", kafka.reservations_topic);

    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = consumer.recv() => received,
        };

        match received {
            Err(e) => error!("Kafka error: {}", e),
            Ok(m) => {
                match m.payload_view::<str>() {
                    Some(Ok(payload)) => {
                        if let Err(e) = handle_reservation_message(&coordinator, &metrics, payload).await {
                            // The overdue sweep picks up holds that never expired here
                            error!("Giving up on reservation message at offset {}: {}", m.offset(), e);
                        }
                    }
                    Some(Err(e)) => error!("Error reading payload: {}", e),
                    None => warn!("Empty message at offset {}", m.offset()),
                }

                if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                    error!("Failed to commit offset {}: {}", m.offset(), e);
                }
            }
        }
    }

    info!("Reservation worker stopped");
    Ok(())
}

/// Time left until `deliver_at`, zero when already due.
pub fn due_in(deliver_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deliver_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Holds each delayed envelope until its delivery time, then forwards it
/// to the reservations topic.
pub async fn start_delay_relay(
    kafka: KafkaConfig,
    producer: EventProducer,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), KafkaError> {
    let group_id = format!("{}-delay-relay", kafka.group_id);
    let consumer = subscribe(&kafka.brokers, &group_id, &kafka.delay_topic)?;

    info!("Delay relay started, forwarding {} to {}", kafka.delay_topic, kafka.reservations_topic);

    'relay: loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = consumer.recv() => received,
        };

        let m = match received {
            Ok(m) => m,
            Err(e) => {
                error!("Kafka error: {}", e);
                continue;
            }
        };

        let delayed = match m.payload_view::<str>() {
            Some(Ok(payload)) => serde_json::from_str::<DelayedMessage>(payload)
                .map_err(|e| warn!("Skipping malformed delayed message: {}", e))
                .ok(),
            Some(Err(e)) => {
                error!("Error reading payload: {}", e);
                None
            }
            None => None,
        };

        if let Some(delayed) = delayed {
            let wait = due_in(delayed.deliver_at, Utc::now());
            if !wait.is_zero() {
                debug!("Holding {} for ticket {} for {:?}", delayed.message.pattern, delayed.message.data.ticket_id, wait);
                tokio::select! {
                    _ = sleep(wait) => {}
                    // Uncommitted, so redelivered after restart
                    _ = shutdown.changed() => break 'relay,
                }
            }

            forward(&producer, &kafka.reservations_topic, &delayed.message).await;
        }

        if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
            error!("Failed to commit offset {}: {}", m.offset(), e);
        }
    }

    info!("Delay relay stopped");
    Ok(())
}

async fn forward(producer: &EventProducer, topic: &str, message: &ReservationMessage) {
    let payload = match serde_json::to_string(message) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to encode {} for ticket {}: {}", message.pattern, message.data.ticket_id, e);
            return;
        }
    };
    let key = message.data.ticket_id.to_string();

    let mut backoff = RETRY_BACKOFF;
    for attempt in 1..=MAX_ATTEMPTS {
        match producer.publish(topic, &key, &payload).await {
            Ok(()) => return,
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!("Forwarding {} for ticket {} failed (attempt {}): {}", message.pattern, key, attempt, e);
                sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => error!("Dropping {} for ticket {} after {} attempts: {}", message.pattern, key, attempt, e),
        }
    }
}

/// Periodically expires PENDING tickets that outlived their hold by more
/// than the grace period.
pub async fn start_expiry_sweeper(
    rules: ReservationRules,
    coordinator: Arc<ReservationCoordinator>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let grace = chrono::Duration::seconds(rules.sweep_grace_seconds as i64);
    let mut ticker = tokio::time::interval(Duration::from_secs(rules.sweep_interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Expiry sweeper started, every {}s", rules.sweep_interval_seconds);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        match coordinator.sweep_overdue(Utc::now() - grace, rules.sweep_batch_size).await {
            Ok(released) => metrics.record_many("sweep", "expired", released as u64),
            Err(e) => error!("Overdue sweep failed: {}", e),
        }
    }

    info!("Expiry sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::{SeatStatus, TicketStatus};
    use marquee_reservation::memory::{InMemoryReservationStore, InMemorySeatLocks, RecordingPublisher};
    use marquee_reservation::ReservationPolicy;
    use marquee_shared::models::events::ReservationEvent;
    use uuid::Uuid;

    async fn setup() -> (Arc<InMemoryReservationStore>, ReservationCoordinator, Uuid) {
        let store = Arc::new(InMemoryReservationStore::new());
        let listing = store.add_showing("Heat", 5000, Utc::now(), &["A"], 2).await;
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            Arc::new(InMemorySeatLocks::new()),
            Arc::new(RecordingPublisher::new()),
            ReservationPolicy::default(),
        );
        (store, coordinator, listing.seats[0].id)
    }

    fn expired_payload(ticket_id: Uuid, seat_id: Uuid) -> String {
        serde_json::to_string(&ReservationMessage::expired(ReservationEvent { ticket_id, seat_id })).unwrap()
    }

    #[tokio::test]
    async fn test_expired_message_releases_seat() {
        let (store, coordinator, seat_id) = setup().await;
        let metrics = Metrics::new().unwrap();
        let pending = coordinator.create_reservation(seat_id, Uuid::new_v4()).await.unwrap();

        handle_reservation_message(&coordinator, &metrics, &expired_payload(pending.ticket_id, seat_id))
            .await
            .unwrap();

        assert_eq!(store.seat(seat_id).await.unwrap().status, SeatStatus::Available);
        assert_eq!(store.ticket(pending.ticket_id).await.unwrap().status, TicketStatus::Canceled);
        assert_eq!(metrics.count("consume", "expired"), 1);
    }

    #[tokio::test]
    async fn test_redelivered_expire_is_ignored() {
        let (store, coordinator, seat_id) = setup().await;
        let metrics = Metrics::new().unwrap();
        let pending = coordinator.create_reservation(seat_id, Uuid::new_v4()).await.unwrap();
        let payload = expired_payload(pending.ticket_id, seat_id);

        handle_reservation_message(&coordinator, &metrics, &payload).await.unwrap();
        handle_reservation_message(&coordinator, &metrics, &payload).await.unwrap();

        assert_eq!(store.tickets_for_seat(seat_id).await.len(), 1);
        assert_eq!(metrics.count("consume", "already_resolved"), 1);
    }

    #[tokio::test]
    async fn test_expire_after_payment_keeps_seat_sold() {
        let (store, coordinator, seat_id) = setup().await;
        let metrics = Metrics::new().unwrap();
        let pending = coordinator.create_reservation(seat_id, Uuid::new_v4()).await.unwrap();
        coordinator.pay_ticket(pending.ticket_id).await.unwrap();

        handle_reservation_message(&coordinator, &metrics, &expired_payload(pending.ticket_id, seat_id))
            .await
            .unwrap();

        assert_eq!(store.seat(seat_id).await.unwrap().status, SeatStatus::Sold);
        assert_eq!(store.ticket(pending.ticket_id).await.unwrap().status, TicketStatus::Paid);
    }

    #[tokio::test]
    async fn test_transient_store_failure_is_retried() {
        let (store, coordinator, seat_id) = setup().await;
        let metrics = Metrics::new().unwrap();
        let pending = coordinator.create_reservation(seat_id, Uuid::new_v4()).await.unwrap();

        store.fail_next_transaction();
        handle_reservation_message(&coordinator, &metrics, &expired_payload(pending.ticket_id, seat_id))
            .await
            .unwrap();

        assert_eq!(store.seat(seat_id).await.unwrap().status, SeatStatus::Available);
    }

    #[tokio::test]
    async fn test_malformed_and_created_messages_change_nothing() {
        let (store, coordinator, seat_id) = setup().await;
        let metrics = Metrics::new().unwrap();

        handle_reservation_message(&coordinator, &metrics, "not json").await.unwrap();
        let created = serde_json::to_string(&ReservationMessage::created(ReservationEvent {
            ticket_id: Uuid::new_v4(),
            seat_id,
        }))
        .unwrap();
        handle_reservation_message(&coordinator, &metrics, &created).await.unwrap();

        assert_eq!(store.seat(seat_id).await.unwrap().status, SeatStatus::Available);
        assert_eq!(metrics.count("consume", "malformed"), 1);
        assert_eq!(metrics.count("consume", "created"), 1);
    }

    #[test]
    fn test_due_in_is_zero_when_past() {
        let now = Utc::now();
        assert_eq!(due_in(now - chrono::Duration::seconds(5), now), Duration::ZERO);
        assert_eq!(due_in(now + chrono::Duration::seconds(30), now), Duration::from_secs(30));
    }
}
