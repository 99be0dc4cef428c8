//! Brain-service request/response types
//!
//! Shared between the `LanguageModel` trait and the HTTP/SSE brain client.
//! Named `llm_types` to match the original crate's module boundary even
//! though the only "language model" in this runtime is the external brain
//! service.

use serde::{Deserialize, Serialize};

use crate::tenant::TransferProfile;
use crate::transcript::Turn;

#[derive(Debug, Clone, Serialize)]
pub struct BrainRequest {
    pub tenant_id: String,
    pub call_id: String,
    pub transcript: String,
    pub history: Vec<Turn>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transfer_profiles: Vec<TransferProfile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assistant_context: Vec<(String, String)>,
}

/// `transfer_call{to, message_to_caller}` tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub to: String,
    pub message_to_caller: String,
}

/// `end_call{goodbye_message}` tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndCallRequest {
    pub goodbye_message: String,
}

/// The brain's answer, whether arrived at via non-streaming `/reply` or
/// assembled from the terminal `event: done` of a streamed reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrainReply {
    pub text: String,
    #[serde(default)]
    pub transfer: Option<TransferRequest>,
    #[serde(default)]
    pub hangup: bool,
}

/// Events yielded while consuming `POST /reply/stream`.
#[derive(Debug, Clone)]
pub enum BrainStreamEvent {
    /// `event: token` — incremental assistant text.
    Token(String),
    /// `event: done` — terminal frame carrying the resolved reply.
    Done(BrainReply),
}
