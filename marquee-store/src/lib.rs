pub mod app_config;
pub mod database;
pub mod reservation_repo;
pub mod redis_repo;
pub mod events;
pub mod seed;

pub use database::DbClient;
pub use reservation_repo::PgReservationRepository;
pub use redis_repo::RedisClient;
pub use events::{EventProducer, KafkaReservationEvents};
