//! Voice call runtime server
//!
//! Webhook ingest, media-stream WebSocket upgrade, and the call session
//! coordinator that ties tenant resolution, capacity admission, the
//! streaming endpointer, and the STT/TTS/brain clients together into the
//! state machine of spec §4.6.

pub mod auth;
pub mod http;
pub mod session;
pub mod state;

pub use http::create_router;
pub use session::{CallCoordinator, SessionRegistry};
pub use state::AppState;

use thiserror::Error;

/// Top-level server error. Each variant maps onto a lower-crate error via
/// an individual `From` impl; nothing here is a blanket catch-all.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("webhook authentication failed: {0:?}")]
    WebhookAuth(auth::WebhookAuthError),

    #[error("tenant not configured")]
    NotConfigured,

    #[error("capacity denied: {0:?}")]
    CapacityDenied(voice_agent_core::DenialReason),

    #[error("no session for call {0}")]
    UnknownCall(String),

    #[error("config error: {0}")]
    Config(#[from] voice_agent_config::ConfigError),

    #[error("capacity error: {0}")]
    Capacity(#[from] voice_agent_capacity::CapacityError),

    #[error("client error: {0}")]
    Client(#[from] voice_agent_clients::ClientError),

    #[error("core error: {0}")]
    Core(#[from] voice_agent_core::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::WebhookAuth(_) => axum::http::StatusCode::UNAUTHORIZED,
            ServerError::NotConfigured | ServerError::Config(_) => axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::UnknownCall(_) => axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::CapacityDenied(_) => axum::http::StatusCode::OK,
            ServerError::Capacity(_) | ServerError::Client(_) | ServerError::Core(_) | ServerError::Internal(_) => {
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
