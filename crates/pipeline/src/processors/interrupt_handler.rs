//! Barge-in / interrupt handling for TTS playback (spec §4.6)
//!
//! Playback is cancellable at segment boundaries. A barge-in detected
//! mid-segment sets a pending-interrupt flag; the currently playing
//! segment is allowed to finish (a mid-segment cancel is only a hint to
//! the carrier, not guaranteed), but no further `Frame::Sentence`
//! segments are emitted once the handler is interrupted, and any
//! `Frame::AudioOutput` produced after that point is dropped. A short
//! grace period after playback starts absorbs echo/leftover caller
//! audio so it isn't mistaken for a genuine barge-in.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use voice_agent_core::{ControlFrame, Frame, FrameProcessor, ProcessorContext, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterruptMode {
    /// Stop as soon as the handler next sees a barge-in (lowest latency).
    #[default]
    Immediate,
    /// Let the in-flight segment finish, then stop before the next one.
    SentenceBoundary,
    /// Ignore barge-in entirely.
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptHandlerConfig {
    pub mode: InterruptMode,
    /// Ignore barge-in for this long (ms) after playback starts.
    pub grace_period_ms: u32,
}

impl Default for InterruptHandlerConfig {
    fn default() -> Self {
        Self { mode: InterruptMode::Immediate, grace_period_ms: 200 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerState {
    Idle,
    Speaking,
    PendingInterrupt,
    Interrupted,
}

pub struct InterruptHandler {
    config: InterruptHandlerConfig,
    state: Mutex<HandlerState>,
    current_sentence: Mutex<usize>,
    target_sentence: Mutex<Option<usize>>,
    tts_start_frame: Mutex<u64>,
    frame_counter: Mutex<u64>,
}

impl InterruptHandler {
    pub fn new(config: InterruptHandlerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HandlerState::Idle),
            current_sentence: Mutex::new(0),
            target_sentence: Mutex::new(None),
            tts_start_frame: Mutex::new(0),
            frame_counter: Mutex::new(0),
        }
    }

    pub fn default_config() -> Self {
        Self::new(InterruptHandlerConfig::default())
    }

    fn in_grace_period(&self) -> bool {
        let frame = *self.frame_counter.lock();
        let start = *self.tts_start_frame.lock();
        let elapsed_ms = frame.saturating_sub(start) * 20;
        elapsed_ms < self.config.grace_period_ms as u64
    }

    fn handle_barge_in(&self, audio_position_ms: u64) -> Vec<Frame> {
        if *self.state.lock() != HandlerState::Speaking {
            return vec![];
        }
        if self.in_grace_period() {
            return vec![];
        }

        match self.config.mode {
            InterruptMode::Disabled => vec![],

            InterruptMode::Immediate => {
                *self.state.lock() = HandlerState::Interrupted;
                vec![Frame::BargeIn { audio_position_ms, transcript: None }]
            }

            InterruptMode::SentenceBoundary => {
                *self.state.lock() = HandlerState::PendingInterrupt;
                let current = *self.current_sentence.lock();
                *self.target_sentence.lock() = Some(current);
                vec![]
            }
        }
    }

    fn should_pass(&self, frame: &Frame) -> bool {
        match *self.state.lock() {
            HandlerState::Idle | HandlerState::Speaking => true,
            HandlerState::PendingInterrupt => !matches!(frame, Frame::AudioOutput(_)),
            HandlerState::Interrupted => !matches!(frame, Frame::AudioOutput(_) | Frame::Sentence { .. }),
        }
    }

    /// Returns false if this sentence must be blocked (past the interrupt target).
    fn process_sentence(&self, index: usize) -> bool {
        *self.current_sentence.lock() = index;

        if *self.state.lock() == HandlerState::PendingInterrupt {
            if let Some(target) = *self.target_sentence.lock() {
                if index > target {
                    *self.state.lock() = HandlerState::Interrupted;
                    return false;
                }
            }
        }
        true
    }

    fn start_speaking(&self) {
        *self.state.lock() = HandlerState::Speaking;
        *self.tts_start_frame.lock() = *self.frame_counter.lock();
    }

    pub fn reset(&self) {
        *self.state.lock() = HandlerState::Idle;
        *self.current_sentence.lock() = 0;
        *self.target_sentence.lock() = None;
    }

    pub fn mode(&self) -> InterruptMode {
        self.config.mode
    }

    pub fn is_interrupted(&self) -> bool {
        *self.state.lock() == HandlerState::Interrupted
    }
}

#[async_trait]
impl FrameProcessor for InterruptHandler {
    async fn process(&self, frame: Frame, _context: &mut ProcessorContext) -> Result<Vec<Frame>> {
        *self.frame_counter.lock() += 1;

        match &frame {
            Frame::BargeIn { audio_position_ms, .. } => {
                let additional = self.handle_barge_in(*audio_position_ms);
                if additional.is_empty() {
                    if self.config.mode == InterruptMode::Disabled {
                        return Ok(vec![frame]);
                    }
                    return Ok(vec![]);
                }
                return Ok(additional);
            }

            Frame::Sentence { index, .. } => {
                if !self.process_sentence(*index) {
                    return Ok(vec![]);
                }
            }

            Frame::AudioOutput(_) => {
                if *self.state.lock() == HandlerState::Idle {
                    self.start_speaking();
                }
            }

            Frame::EndOfStream => self.reset(),

            Frame::Control(ControlFrame::Reset) => self.reset(),

            _ => {}
        }

        if self.should_pass(&frame) {
            Ok(vec![frame])
        } else {
            Ok(vec![])
        }
    }

    fn name(&self) -> &'static str {
        "interrupt_handler"
    }

    fn description(&self) -> &str {
        "Cancels pending TTS playback on caller barge-in"
    }

    async fn on_start(&self, _context: &mut ProcessorContext) -> Result<()> {
        self.reset();
        Ok(())
    }

    async fn on_stop(&self, _context: &mut ProcessorContext) -> Result<()> {
        self.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_immediate_interrupt() {
        let handler = InterruptHandler::new(InterruptHandlerConfig { mode: InterruptMode::Immediate, grace_period_ms: 0 });
        let mut ctx = ProcessorContext::default();

        handler.start_speaking();

        let frames = handler
            .process(Frame::BargeIn { audio_position_ms: 1000, transcript: None }, &mut ctx)
            .await
            .unwrap();

        assert!(frames.iter().any(|f| matches!(f, Frame::BargeIn { .. })));
        assert!(handler.is_interrupted());
    }

    #[tokio::test]
    async fn test_sentence_boundary_interrupt() {
        let handler =
            InterruptHandler::new(InterruptHandlerConfig { mode: InterruptMode::SentenceBoundary, grace_period_ms: 0 });
        let mut ctx = ProcessorContext::default();

        handler.start_speaking();

        handler
            .process(Frame::Sentence { text: "First sentence.".into(), index: 0 }, &mut ctx)
            .await
            .unwrap();

        let frames = handler
            .process(Frame::BargeIn { audio_position_ms: 1000, transcript: None }, &mut ctx)
            .await
            .unwrap();

        assert!(frames.is_empty());
        assert!(!handler.is_interrupted());

        let frames = handler
            .process(Frame::Sentence { text: "Second sentence.".into(), index: 1 }, &mut ctx)
            .await
            .unwrap();

        assert!(frames.is_empty());
        assert!(handler.is_interrupted());
    }

    #[tokio::test]
    async fn test_disabled_mode() {
        let handler = InterruptHandler::new(InterruptHandlerConfig { mode: InterruptMode::Disabled, grace_period_ms: 0 });
        let mut ctx = ProcessorContext::default();

        handler.start_speaking();

        let frames = handler
            .process(Frame::BargeIn { audio_position_ms: 1000, transcript: None }, &mut ctx)
            .await
            .unwrap();

        assert_eq!(frames.len(), 1);
        assert!(!handler.is_interrupted());
    }

    #[tokio::test]
    async fn test_grace_period() {
        let handler = InterruptHandler::new(InterruptHandlerConfig { mode: InterruptMode::Immediate, grace_period_ms: 500 });
        let mut ctx = ProcessorContext::default();

        handler.start_speaking();

        let frames = handler
            .process(Frame::BargeIn { audio_position_ms: 100, transcript: None }, &mut ctx)
            .await
            .unwrap();

        assert!(frames.is_empty());
        assert!(!handler.is_interrupted());
    }

    #[tokio::test]
    async fn test_reset() {
        let handler = InterruptHandler::new(InterruptHandlerConfig { mode: InterruptMode::Immediate, grace_period_ms: 0 });
        let mut ctx = ProcessorContext::default();

        handler.start_speaking();
        handler
            .process(Frame::BargeIn { audio_position_ms: 1000, transcript: None }, &mut ctx)
            .await
            .unwrap();
        assert!(handler.is_interrupted());

        handler.reset();
        assert!(!handler.is_interrupted());
    }

    #[tokio::test]
    async fn test_audio_blocked_when_interrupted() {
        let handler = InterruptHandler::new(InterruptHandlerConfig { mode: InterruptMode::Immediate, grace_period_ms: 0 });
        let mut ctx = ProcessorContext::default();

        handler.start_speaking();
        handler
            .process(Frame::BargeIn { audio_position_ms: 1000, transcript: None }, &mut ctx)
            .await
            .unwrap();

        let audio_frame = voice_agent_core::AudioFrame::new(
            vec![0.0; 160],
            voice_agent_core::SampleRate::Hz16000,
            voice_agent_core::Channels::Mono,
            0,
        );

        let frames = handler.process(Frame::AudioOutput(audio_frame), &mut ctx).await.unwrap();

        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn barge_in_within_50ms_of_segment_start_still_cancels_next_segment() {
        // Testable property (spec §8): a barge-in fired right at segment
        // start, after the grace period has elapsed, still blocks the
        // segment that follows.
        let handler =
            InterruptHandler::new(InterruptHandlerConfig { mode: InterruptMode::SentenceBoundary, grace_period_ms: 0 });
        let mut ctx = ProcessorContext::default();

        handler.start_speaking();
        handler
            .process(Frame::Sentence { text: "Segment zero.".into(), index: 0 }, &mut ctx)
            .await
            .unwrap();
        handler
            .process(Frame::BargeIn { audio_position_ms: 10, transcript: None }, &mut ctx)
            .await
            .unwrap();

        let frames = handler
            .process(Frame::Sentence { text: "Segment one.".into(), index: 1 }, &mut ctx)
            .await
            .unwrap();

        assert!(frames.is_empty());
        assert!(handler.is_interrupted());
    }
}
