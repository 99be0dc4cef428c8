//! Core traits for the voice call runtime
//!
//! # Trait Hierarchy
//!
//! ```text
//! Speech Processing:
//!   - SpeechToText: Audio -> Text transcription
//!   - TextToSpeech: Text -> Audio synthesis
//!
//! Language Models:
//!   - LanguageModel: Brain round trip, streaming and non-streaming
//!
//! Shared state:
//!   - KvStore: tenant config cache, capacity counters
//!
//! Pipeline:
//!   - FrameProcessor: process frames flowing through a call's pipeline
//! ```

mod kv;
mod speech;
mod llm;
mod pipeline;

pub use kv::{KvResult, KvStore};
pub use speech::{SpeechToText, TextToSpeech, TtsAudio, TtsRequest};
pub use llm::LanguageModel;
pub use pipeline::{ControlFrame, Frame, FrameProcessor, MetricsEvent, ProcessorContext};
