use async_trait::async_trait;
use marquee_core::{CoreError, CoreResult, SeatLockStore};
use redis::RedisResult;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    lock_prefix: String,
}

impl RedisClient {
    pub async fn new(connection_string: &str, lock_prefix: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;

        // Fail at startup rather than on the first reservation
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Connected to Redis");

        Ok(Self { client, lock_prefix: lock_prefix.to_string() })
    }

    pub fn lock_key(&self, seat_id: &Uuid) -> String {
        format!("{}{}", self.lock_prefix, seat_id)
    }

    pub async fn acquire_seat_lock(&self, seat_id: &Uuid, holder: &str, ttl_seconds: u64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.lock_key(seat_id);

        // SET NX: Only set if key does not exist
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(holder)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    /// Compare-and-delete: an entry written by another holder is left alone.
    pub async fn release_seat_lock(&self, seat_id: &Uuid, holder: &str) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.lock_key(seat_id);

        let script = redis::Script::new(r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#);

        let deleted: i64 = script.key(key).arg(holder).invoke_async(&mut conn).await?;
        Ok(deleted == 1)
    }
}

/// Redis rounds expiry up to whole seconds; never below one.
fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl SeatLockStore for RedisClient {
    async fn acquire(&self, seat_id: Uuid, holder: &str, ttl: Duration) -> CoreResult<bool> {
        self.acquire_seat_lock(&seat_id, holder, ttl_seconds(ttl))
            .await
            .map_err(CoreError::lock)
    }

    async fn release(&self, seat_id: Uuid, holder: &str) -> CoreResult<()> {
        let deleted = self
            .release_seat_lock(&seat_id, holder)
            .await
            .map_err(CoreError::lock)?;

        if !deleted {
            debug!("Lock for seat {} was already gone or re-acquired by another holder", seat_id);
        }
        Ok(())
    }
}
