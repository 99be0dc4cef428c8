//! Distributed capacity admission controller (§4.3)
//!
//! Three scopes — per-tenant-per-minute, per-tenant concurrent, global
//! concurrent — are reserved in fixed order against counters living in
//! the shared KV store, with reverse-order rollback on any scope
//! refusing admission. A local sweep recovers leaked reservations from
//! crashed or forgotten teardowns.

pub mod controller;
pub mod kv;

pub use controller::{AdmissionController, CallHandle};
pub use kv::RedisKvStore;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CapacityError {
    #[error("kv store error: {0}")]
    Store(String),

    #[error("rate limited")]
    RateLimited,

    #[error("tenant at capacity")]
    TenantAtCapacity,

    #[error("system at capacity")]
    SystemAtCapacity,
}

impl From<CapacityError> for voice_agent_core::DenialReason {
    fn from(err: CapacityError) -> Self {
        match err {
            CapacityError::RateLimited => voice_agent_core::DenialReason::RateLimited,
            CapacityError::TenantAtCapacity => voice_agent_core::DenialReason::TenantAtCapacity,
            CapacityError::SystemAtCapacity | CapacityError::Store(_) => {
                voice_agent_core::DenialReason::SystemAtCapacity
            }
        }
    }
}
