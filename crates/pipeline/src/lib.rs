//! Audio ingest, endpointing, and playback pipeline (spec §4.2, §4.5, §6)
//!
//! - [`codec`]: carrier media frame decode to internal PCM, with
//!   codec-fallback restart bookkeeping.
//! - [`endpointer`]: the streaming STT endpointer state machine.
//! - [`playback`]: resample/high-pass/normalize/limit and the filler
//!   phrase pre-warm cache.
//! - [`processors`]: channel-connected `FrameProcessor` chain used to
//!   segment brain-stream text for progressive TTS and to cancel
//!   playback on barge-in.

pub mod aec;
pub mod codec;
pub mod endpointer;
pub mod playback;
pub mod processors;

pub use aec::EchoCanceller;
pub use codec::{encode_mulaw, CodecError, DecodedFrame, FrameDecoder, NegotiatedCodec};
pub use endpointer::{Endpointer, EndpointerState, EndpointerEvent};
pub use playback::{resample_to_rate, FillerCache, PlaybackProfile, ShapedAudio};
pub use processors::{
    InterruptHandler, InterruptHandlerConfig, InterruptMode, ProcessorChain, ProcessorChainBuilder,
    SentenceDetector, SentenceDetectorConfig,
};

use thiserror::Error;

/// Errors internal to this crate, mapped onto the six variants of
/// [`voice_agent_core::error::PipelineError`] at the boundary.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("not initialized")]
    NotInitialized,

    #[error("channel closed")]
    ChannelClosed,

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("audio error: {0}")]
    Audio(String),
}

impl From<PipelineError> for voice_agent_core::Error {
    fn from(err: PipelineError) -> Self {
        use voice_agent_core::error::PipelineError as CorePipelineError;

        let core_err = match err {
            PipelineError::Codec(msg) => CorePipelineError::Codec(msg),
            PipelineError::Resample(msg) => CorePipelineError::Resample(msg),
            PipelineError::NotInitialized => CorePipelineError::NotInitialized,
            PipelineError::ChannelClosed => CorePipelineError::ChannelClosed,
            PipelineError::Timeout(ms) => CorePipelineError::Timeout(ms),
            PipelineError::Audio(msg) => CorePipelineError::Audio(msg),
        };

        voice_agent_core::Error::Pipeline(core_err)
    }
}

impl From<CodecError> for PipelineError {
    fn from(err: CodecError) -> Self {
        PipelineError::Codec(err.to_string())
    }
}
