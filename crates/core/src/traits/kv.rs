//! Key-value store abstraction
//!
//! The runtime's only shared-state dependency: tenant config, the
//! DID-to-tenant map, and the three capacity counters all live behind this
//! trait. `voice_agent_capacity::RedisKvStore` is the production
//! implementation; an in-memory stub backs tests.

use async_trait::async_trait;

/// Errors are represented as strings deliberately: callers (the tenant
/// resolver, the admission controller) wrap them into their own typed
/// errors immediately, so there is no value in a rich KV-specific enum
/// here.
pub type KvResult<T> = Result<T, String>;

#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Fetch a string value.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Set a string value with an optional TTL in seconds.
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> KvResult<()>;

    /// Atomically increment a counter, creating it at `0` if absent, and
    /// set/refresh its TTL. Returns the post-increment value.
    async fn incr(&self, key: &str, ttl_seconds: u64) -> KvResult<i64>;

    /// Atomically decrement a counter, never going below zero. Returns the
    /// post-decrement value.
    async fn decr_floor_zero(&self, key: &str) -> KvResult<i64>;

    async fn del(&self, key: &str) -> KvResult<()>;
}
