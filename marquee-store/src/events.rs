use async_trait::async_trait;
use chrono::Utc;
use marquee_core::{CoreError, CoreResult, ReservationEventPublisher};
use marquee_shared::models::events::{DelayedMessage, ReservationEvent, ReservationMessage};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{info, error};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!("Sent message to {}/{}: partition {} offset {}", topic, key, delivery.partition, delivery.offset);
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }

    /// Block until queued messages are delivered or `timeout` passes.
    pub fn flush(&self, timeout: Duration) -> Result<(), rdkafka::error::KafkaError> {
        self.producer.flush(Timeout::After(timeout))
    }
}

/// Reservation notifications over Kafka.
///
/// `reservation.created` goes straight to the reservations topic.
/// `reservation.expired` goes to the delay topic wrapped with its due time;
/// the delay relay forwards it to the reservations topic once due.
#[derive(Clone)]
pub struct KafkaReservationEvents {
    producer: EventProducer,
    reservations_topic: String,
    delay_topic: String,
}

impl KafkaReservationEvents {
    pub fn new(producer: EventProducer, reservations_topic: &str, delay_topic: &str) -> Self {
        Self {
            producer,
            reservations_topic: reservations_topic.to_string(),
            delay_topic: delay_topic.to_string(),
        }
    }
}

#[async_trait]
impl ReservationEventPublisher for KafkaReservationEvents {
    async fn publish_created(&self, event: &ReservationEvent) -> CoreResult<()> {
        let payload = serde_json::to_string(&ReservationMessage::created(*event)).map_err(CoreError::channel)?;

        self.producer
            .publish(&self.reservations_topic, &event.ticket_id.to_string(), &payload)
            .await
            .map_err(CoreError::channel)
    }

    async fn schedule_expiration(&self, event: &ReservationEvent, delay: Duration) -> CoreResult<()> {
        let delay = chrono::Duration::milliseconds(delay.as_millis() as i64);
        let delayed = DelayedMessage {
            deliver_at: Utc::now() + delay,
            message: ReservationMessage::expired(*event),
        };
        let payload = serde_json::to_string(&delayed).map_err(CoreError::channel)?;

        self.producer
            .publish(&self.delay_topic, &event.ticket_id.to_string(), &payload)
            .await
            .map_err(CoreError::channel)
    }
}
