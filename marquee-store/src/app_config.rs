use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub reservations: ReservationRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationRules {
    pub hold_seconds: u64,
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: String,
    /// 0 disables the overdue sweep
    #[serde(default)]
    pub sweep_interval_seconds: u64,
    #[serde(default)]
    pub sweep_grace_seconds: u64,
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch_size: i64,
}

fn default_lock_prefix() -> String { "seat:lock:".to_string() }
fn default_sweep_batch() -> i64 { 100 }

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 10 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    pub reservations_topic: String,
    pub delay_topic: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `MARQUEE__RESERVATIONS__HOLD_SECONDS=60`
            .add_source(config::Environment::with_prefix("MARQUEE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
