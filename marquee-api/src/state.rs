use std::sync::Arc;
use marquee_reservation::ReservationCoordinator;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReservationCoordinator>,
    pub metrics: Arc<Metrics>,
}
