//! Process and tenant configuration for the voice call runtime
//!
//! Two layers:
//! - [`settings`]: process-wide configuration, read once at startup from
//!   the environment (§6 "Configuration surface").
//! - [`resolver`]: per-call tenant configuration, resolved from the KV
//!   store and cached with a short TTL (§4.1).

pub mod resolver;
pub mod settings;

pub use resolver::{TenantResolver, TenantResolverConfig};
pub use settings::{
    load_settings, AudioConfig, BrainConfig, CapacityConfig, ControlPlaneConfig, EndpointerConfig,
    RedisConfig, ServerConfig, Settings, SttConfig, TelnyxConfig, TtsConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("tenant not configured for dialed number")]
    NotConfigured,

    #[error("tenant config failed validation: {0}")]
    InvalidTenantConfig(String),

    #[error("kv store error: {0}")]
    KvStore(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
