use axum::extract::State;
use marquee_reservation::{ErrorKind, ReservationError};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use crate::error::AppError;
use crate::state::AppState;

pub struct Metrics {
    registry: Registry,
    outcomes: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let outcomes = IntCounterVec::new(
            Opts::new("marquee_reservation_outcomes_total", "Reservation operations by outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(outcomes.clone()))?;

        Ok(Self { registry, outcomes })
    }

    pub fn record(&self, operation: &str, outcome: &str) {
        self.outcomes.with_label_values(&[operation, outcome]).inc();
    }

    pub fn record_many(&self, operation: &str, outcome: &str, count: u64) {
        self.outcomes.with_label_values(&[operation, outcome]).inc_by(count);
    }

    pub fn observe<T>(&self, operation: &str, result: &Result<T, ReservationError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => match e.kind() {
                ErrorKind::Conflict => "conflict",
                ErrorKind::NotFound => "not_found",
                ErrorKind::Internal => "internal",
            },
        };
        self.record(operation, outcome);
    }

    pub fn count(&self, operation: &str, outcome: &str) -> u64 {
        self.outcomes.with_label_values(&[operation, outcome]).get()
    }

    pub fn encode(&self) -> Result<String, AppError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| AppError::Anyhow(e.into()))
    }
}

/// GET /metrics
pub async fn render(State(state): State<AppState>) -> Result<String, AppError> {
    state.metrics.encode()
}
