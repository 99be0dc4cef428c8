//! Redis-backed [`KvStore`] implementation
//!
//! Counter increment/decrement go through Lua scripts so the
//! read-modify-write against Redis is atomic across concurrent
//! reservations from other processes, following the token-bucket script
//! pattern used for distributed rate limiting elsewhere in the
//! ecosystem.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use voice_agent_core::{KvResult, KvStore};

/// Atomically increments `KEYS[1]` by 1, sets/refreshes its TTL to
/// `ARGV[1]` seconds, and returns the post-increment value.
const INCR_WITH_TTL_SCRIPT: &str = r#"
local key = KEYS[1]
local ttl = tonumber(ARGV[1])
local value = redis.call('INCR', key)
redis.call('EXPIRE', key, ttl)
return value
"#;

/// Atomically decrements `KEYS[1]`, floored at 0, and returns the
/// post-decrement value. Never decrements below zero so a stray
/// double-release cannot corrupt the counter into negative territory.
const DECR_FLOOR_ZERO_SCRIPT: &str = r#"
local key = KEYS[1]
local value = tonumber(redis.call('GET', key) or "0")
if value <= 0 then
    redis.call('SET', key, 0)
    return 0
end
local new_value = redis.call('DECR', key)
if new_value < 0 then
    redis.call('SET', key, 0)
    return 0
end
return new_value
"#;

pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| {
            warn!(key, error = %e, "kv get failed");
            e.to_string()
        })
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> KvResult<()> {
        let mut conn = self.conn.clone();
        match ttl_seconds {
            Some(ttl) => conn.set_ex(key, value, ttl).await.map_err(|e| e.to_string()),
            None => conn.set(key, value).await.map_err(|e| e.to_string()),
        }
    }

    async fn incr(&self, key: &str, ttl_seconds: u64) -> KvResult<i64> {
        let mut conn = self.conn.clone();
        redis::Script::new(INCR_WITH_TTL_SCRIPT)
            .key(key)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(key, error = %e, "kv incr failed");
                e.to_string()
            })
    }

    async fn decr_floor_zero(&self, key: &str) -> KvResult<i64> {
        let mut conn = self.conn.clone();
        redis::Script::new(DECR_FLOOR_ZERO_SCRIPT)
            .key(key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(key, error = %e, "kv decr failed");
                e.to_string()
            })
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut conn = self.conn.clone();
        conn.del(key).await.map_err(|e| e.to_string())
    }
}
