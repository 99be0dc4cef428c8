//! Pipeline processing traits
//!
//! The frame/processor abstraction used by the endpointer, sentence
//! segmentation, and barge-in handling. Each call's pipeline is a chain of
//! `FrameProcessor`s connected by channels (see
//! `voice_agent_pipeline::processors::chain`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::transcript::TranscriptResult;
use crate::AudioFrame;

/// Frame types that flow through the pipeline.
///
/// Note: some variants contain non-serializable types (`AudioFrame`); use
/// the serializable variants or convert before serializing.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Decoded audio from the media stream.
    AudioInput(AudioFrame),

    /// Speculative partial transcript; never enters conversation history.
    TranscriptPartial { text: String, confidence: f32 },

    /// Utterance-final transcript.
    TranscriptFinal(TranscriptResult),

    /// Brain response chunk (streaming).
    LLMChunk { text: String, is_final: bool },

    /// Complete sentence ready for TTS.
    Sentence { text: String, index: usize },

    /// Synthesized audio ready for playback.
    AudioOutput(AudioFrame),

    /// User speech detected during assistant playback.
    BargeIn {
        audio_position_ms: u64,
        transcript: Option<String>,
    },

    /// Voice activity started.
    VoiceStart,

    /// Voice activity ended.
    VoiceEnd { duration_ms: u64 },

    /// End of stream marker.
    EndOfStream,

    /// Error occurred in pipeline.
    Error {
        stage: String,
        message: String,
        recoverable: bool,
    },

    /// Control frame for pipeline management.
    Control(ControlFrame),

    /// Metrics/telemetry event.
    Metrics(Arc<MetricsEvent>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEvent {
    pub name: String,
    pub timestamp_ms: u64,
    pub data: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlFrame {
    Flush,
    Reset,
    Configure(HashMap<String, serde_json::Value>),
    GetMetrics,
}

impl Frame {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Frame::EndOfStream)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error { .. })
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Frame::Control(_))
    }

    pub fn stage_name(&self) -> &'static str {
        match self {
            Frame::AudioInput(_) => "audio_input",
            Frame::TranscriptPartial { .. } => "transcript_partial",
            Frame::TranscriptFinal(_) => "transcript_final",
            Frame::LLMChunk { .. } => "llm_chunk",
            Frame::Sentence { .. } => "sentence",
            Frame::AudioOutput(_) => "audio_output",
            Frame::BargeIn { .. } => "barge_in",
            Frame::VoiceStart => "voice_start",
            Frame::VoiceEnd { .. } => "voice_end",
            Frame::EndOfStream => "end_of_stream",
            Frame::Error { .. } => "error",
            Frame::Control(_) => "control",
            Frame::Metrics(_) => "metrics",
        }
    }
}

/// Context passed to frame processors.
#[derive(Debug, Clone, Default)]
pub struct ProcessorContext {
    pub session_id: String,
    pub turn_number: usize,
    pub metadata: HashMap<String, serde_json::Value>,
    state: HashMap<String, serde_json::Value>,
}

impl ProcessorContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn next_turn(&mut self) {
        self.turn_number += 1;
    }

    pub fn get_state<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.state.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_state<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.state.insert(key.into(), v);
        }
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.into(), value.into());
    }
}

/// Frame processor for pipeline stages.
///
/// Each processor receives frames, processes them, and emits output
/// frames. Processors run in separate tokio tasks, connected by channels.
#[async_trait]
pub trait FrameProcessor: Send + Sync + 'static {
    async fn process(&self, frame: Frame, context: &mut ProcessorContext) -> Result<Vec<Frame>>;

    fn name(&self) -> &'static str;

    fn description(&self) -> &str {
        ""
    }

    async fn on_start(&self, _context: &mut ProcessorContext) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&self, _context: &mut ProcessorContext) -> Result<()> {
        Ok(())
    }

    fn can_handle(&self, frame: &Frame) -> bool {
        let _ = frame;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_stage_names() {
        assert_eq!(Frame::VoiceStart.stage_name(), "voice_start");
        assert_eq!(Frame::EndOfStream.stage_name(), "end_of_stream");
    }

    #[test]
    fn processor_context_state_roundtrips() {
        let mut ctx = ProcessorContext::new("session-123");
        assert_eq!(ctx.turn_number, 0);
        ctx.next_turn();
        assert_eq!(ctx.turn_number, 1);

        ctx.set_state("buffer_size", 1024usize);
        assert_eq!(ctx.get_state::<usize>("buffer_size"), Some(1024));
    }

    #[test]
    fn frame_predicates() {
        assert!(Frame::EndOfStream.is_end_of_stream());
        assert!(Frame::Error { stage: "test".into(), message: "err".into(), recoverable: false }.is_error());
        assert!(Frame::Control(ControlFrame::Flush).is_control());
    }
}
