//! Core types and traits for the voice call runtime
//!
//! This crate provides the foundational types shared across all other
//! crates: pluggable backend traits (STT, TTS, brain, KV store), audio
//! frame representation, transcript/turn types, tenant configuration, and
//! capacity admission types. It depends on nothing else in the workspace.

pub mod audio;
pub mod capacity;
pub mod error;
pub mod llm_types;
pub mod tenant;
pub mod traits;
pub mod transcript;

pub use audio::{AudioFrame, Channels, SampleRate};
pub use capacity::{CapacityScope, DenialReason};
pub use error::{Error, Result};
pub use llm_types::{BrainReply, BrainRequest, BrainStreamEvent, EndCallRequest, TransferRequest};
pub use tenant::{
    normalize_e164, AssistantContextSection, SecretRef, SttConfig, TenantConfig, TransferProfile,
    TtsBackendKind, TtsConfig, TtsTuning, CONTRACT_VERSION,
};
pub use traits::{
    ControlFrame, Frame, FrameProcessor, KvResult, KvStore, LanguageModel, MetricsEvent,
    ProcessorContext, SpeechToText, TextToSpeech, TtsAudio, TtsRequest,
};
pub use transcript::{TranscriptArtifact, TranscriptResult, Turn, TurnRole, WordTimestamp};
