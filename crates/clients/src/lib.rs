//! Bounded HTTP/SSE clients for the STT, TTS, brain, and control-plane
//! services (spec §4.4, §6).
//!
//! Every client here fronts a plain HTTP microservice out of scope for
//! this crate's own correctness: the STT, TTS, and brain services, plus
//! the control-plane reporting endpoint. What lives in this crate is the
//! bounded-deadline, retry-on-transient-failure, streaming-segmentation
//! plumbing around those calls — never the services themselves.

pub mod brain;
pub mod carrier;
pub mod control_plane;
pub mod retry;
pub mod stt;
pub mod tts;

pub use brain::HttpBrainClient;
pub use carrier::CarrierCallControlClient;
pub use control_plane::ControlPlaneClient;
pub use stt::HttpSttClient;
pub use tts::{shape_tts_text, HttpTtsClient};

use thiserror::Error;

/// Errors produced by the STT/TTS/brain/control-plane clients.
///
/// `Transient` covers 5xx, connection reset, and timeout — the cases
/// spec §4.4/§7 says get one retry with `250ms * 2^attempt` backoff
/// before surfacing. Every other variant is terminal: retrying it again
/// would not help.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("transient failure calling {service}: {message}")]
    Transient { service: &'static str, message: String },

    #[error("request to {service} timed out after {elapsed:?}")]
    Timeout { service: &'static str, elapsed: std::time::Duration },

    #[error("{service} returned an unexpected response: {message}")]
    BadResponse { service: &'static str, message: String },

    #[error("{service} request could not be built: {message}")]
    Request { service: &'static str, message: String },
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient { .. } | ClientError::Timeout { .. })
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
