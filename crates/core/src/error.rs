//! Shared error types
//!
//! Each crate in the workspace defines its own error enum and maps it into
//! [`Error`] via `From`, so callers deep in the call stack keep precise
//! error information while the top of the stack (the server crate) can work
//! with a single type.

use thiserror::Error;

/// Errors produced by the endpointer, codec decode, and playback pipeline.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("codec decode error: {0}")]
    Codec(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("endpointer not initialized")]
    NotInitialized,

    #[error("channel closed")]
    ChannelClosed,

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("audio error: {0}")]
    Audio(String),
}

/// Errors produced by tenant config loading and validation.
#[derive(Error, Debug, Clone)]
pub enum TenantError {
    #[error("dialed number not mapped to a tenant")]
    NotConfigured,

    #[error("tenant config missing for {0}")]
    MissingConfig(String),

    #[error("unsupported contract version: {0}")]
    BadVersion(String),

    #[error("invalid field {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("secret reference {0} could not be resolved")]
    UnresolvedSecret(String),

    #[error("store error: {0}")]
    Store(String),
}

/// Top-level error type shared across crates.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("tenant error: {0}")]
    Tenant(#[from] TenantError),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
