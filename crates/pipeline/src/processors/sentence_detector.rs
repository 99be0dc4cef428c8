//! Streaming brain-reply segmentation for TTS (spec §4.4)
//!
//! Buffers incremental brain-stream text and emits complete segments as
//! soon as they're ready for synthesis: the first segment flushes at
//! `segment_min_chars` or a sentence terminator, whichever comes first;
//! every segment after that waits for `segment_next_chars` or a
//! terminator. This is what lets the coordinator start TTS (and thus
//! playback) before the brain has finished generating its full reply.

use async_trait::async_trait;
use parking_lot::Mutex;
use voice_agent_core::{ControlFrame, Frame, FrameProcessor, ProcessorContext, Result};

const TERMINATORS: [char; 3] = ['.', '!', '?'];

#[derive(Debug, Clone)]
pub struct SentenceDetectorConfig {
    /// Flush the first segment once the buffer reaches this many
    /// characters, even without a terminator (latency optimization).
    pub segment_min_chars: usize,
    /// Flush subsequent segments at this size if no terminator appears
    /// first.
    pub segment_next_chars: usize,
    /// Emit whatever is left in the buffer when the stream ends.
    pub emit_partial_on_flush: bool,
}

impl Default for SentenceDetectorConfig {
    fn default() -> Self {
        Self { segment_min_chars: 40, segment_next_chars: 80, emit_partial_on_flush: true }
    }
}

/// Buffers `Frame::LLMChunk` text and emits `Frame::Sentence` segments.
pub struct SentenceDetector {
    config: SentenceDetectorConfig,
    buffer: Mutex<String>,
    segment_index: Mutex<usize>,
    first_emitted: Mutex<bool>,
}

impl SentenceDetector {
    pub fn new(config: SentenceDetectorConfig) -> Self {
        Self { config, buffer: Mutex::new(String::new()), segment_index: Mutex::new(0), first_emitted: Mutex::new(false) }
    }

    pub fn default_config() -> Self {
        Self::new(SentenceDetectorConfig::default())
    }

    fn find_segments(&self, text: &str) -> (Vec<String>, String) {
        let mut segments = Vec::new();
        let mut current = String::new();
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            current.push(c);

            if TERMINATORS.contains(&c) {
                let mut end = i + 1;
                while end < chars.len() {
                    let next = chars[end];
                    if next == '"' || next == '\'' || next == ')' || next == ']' {
                        current.push(next);
                        end += 1;
                    } else if next.is_whitespace() {
                        current.push(next);
                        end += 1;
                        break;
                    } else {
                        break;
                    }
                }
                i = end;

                let segment = current.trim().to_string();
                if !segment.is_empty() {
                    segments.push(segment);
                }
                current.clear();
            } else {
                i += 1;
            }
        }

        (segments, current)
    }

    fn extract_segments(&self) -> Vec<String> {
        let mut buffer = self.buffer.lock();
        let (segments, remaining) = self.find_segments(&buffer);
        *buffer = remaining;
        segments
    }

    fn flush_buffer(&self) -> Option<String> {
        let mut buffer = self.buffer.lock();
        if buffer.trim().is_empty() {
            buffer.clear();
            return None;
        }
        let text = buffer.trim().to_string();
        buffer.clear();
        Some(text)
    }

    fn create_segment_frames(&self, segments: Vec<String>) -> Vec<Frame> {
        let mut index = self.segment_index.lock();
        let mut first = self.first_emitted.lock();

        segments
            .into_iter()
            .map(|text| {
                let frame = Frame::Sentence { text, index: *index };
                *index += 1;
                *first = true;
                frame
            })
            .collect()
    }

    fn threshold(&self) -> usize {
        if *self.first_emitted.lock() {
            self.config.segment_next_chars
        } else {
            self.config.segment_min_chars
        }
    }

    pub fn reset(&self) {
        self.buffer.lock().clear();
        *self.segment_index.lock() = 0;
        *self.first_emitted.lock() = false;
    }
}

#[async_trait]
impl FrameProcessor for SentenceDetector {
    async fn process(&self, frame: Frame, _context: &mut ProcessorContext) -> Result<Vec<Frame>> {
        match frame {
            Frame::LLMChunk { text, is_final } => {
                self.buffer.lock().push_str(&text);

                let mut segments = self.extract_segments();

                if is_final {
                    if let Some(remaining) = self.flush_buffer() {
                        segments.push(remaining);
                    }
                }

                if segments.is_empty() && !is_final {
                    let buffer_len = self.buffer.lock().chars().count();
                    if buffer_len >= self.threshold() {
                        let mut buffer = self.buffer.lock();
                        if let Some(pos) = buffer.rfind(char::is_whitespace) {
                            let partial = buffer[..pos].trim().to_string();
                            let remaining = buffer[pos..].to_string();
                            *buffer = remaining;
                            if !partial.is_empty() {
                                segments.push(partial);
                            }
                        }
                    }
                }

                Ok(self.create_segment_frames(segments))
            }

            Frame::Control(ControlFrame::Flush) => {
                let mut frames = Vec::new();
                if self.config.emit_partial_on_flush {
                    if let Some(remaining) = self.flush_buffer() {
                        frames.extend(self.create_segment_frames(vec![remaining]));
                    }
                }
                frames.push(frame);
                Ok(frames)
            }

            Frame::Control(ControlFrame::Reset) => {
                self.reset();
                Ok(vec![frame])
            }

            Frame::EndOfStream => {
                let mut frames = Vec::new();
                if let Some(remaining) = self.flush_buffer() {
                    frames.extend(self.create_segment_frames(vec![remaining]));
                }
                frames.push(frame);
                Ok(frames)
            }

            other => Ok(vec![other]),
        }
    }

    fn name(&self) -> &'static str {
        "sentence_detector"
    }

    fn description(&self) -> &str {
        "Segments streaming brain-reply text into TTS-ready chunks"
    }

    async fn on_stop(&self, _context: &mut ProcessorContext) -> Result<()> {
        self.reset();
        Ok(())
    }

    fn can_handle(&self, frame: &Frame) -> bool {
        matches!(frame, Frame::LLMChunk { .. } | Frame::Control(_) | Frame::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> SentenceDetector {
        SentenceDetector::new(SentenceDetectorConfig { segment_min_chars: 10, segment_next_chars: 30, ..Default::default() })
    }

    #[tokio::test]
    async fn splits_on_sentence_terminators() {
        let d = detector();
        let mut ctx = ProcessorContext::default();
        let frames = d
            .process(Frame::LLMChunk { text: "Hello world. How are you?".to_string(), is_final: true }, &mut ctx)
            .await
            .unwrap();

        let texts: Vec<_> = frames.iter().filter_map(|f| match f { Frame::Sentence { text, .. } => Some(text.as_str()), _ => None }).collect();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("Hello world"));
    }

    #[tokio::test]
    async fn first_segment_emits_earlier_than_later_ones() {
        let d = detector();
        let mut ctx = ProcessorContext::default();
        // No terminator; exceeds segment_min_chars (10) so should force-emit.
        let frames = d.process(Frame::LLMChunk { text: "this is eleven".to_string(), is_final: false }, &mut ctx).await.unwrap();
        assert!(frames.iter().any(|f| matches!(f, Frame::Sentence { .. })));
    }

    #[tokio::test]
    async fn passthrough_for_non_llm_frames() {
        let d = detector();
        let mut ctx = ProcessorContext::default();
        let frames = d.process(Frame::VoiceStart, &mut ctx).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::VoiceStart));
    }

    #[tokio::test]
    async fn end_of_stream_flushes_remaining_buffer() {
        let d = detector();
        let mut ctx = ProcessorContext::default();
        d.process(Frame::LLMChunk { text: "trailing fragment no terminator".to_string(), is_final: false }, &mut ctx).await.unwrap();
        let frames = d.process(Frame::EndOfStream, &mut ctx).await.unwrap();
        assert!(frames.iter().any(|f| matches!(f, Frame::Sentence { .. })));
    }

    #[tokio::test]
    async fn segment_index_increments_in_order() {
        let d = detector();
        let mut ctx = ProcessorContext::default();
        let frames = d.process(Frame::LLMChunk { text: "One. Two. Three.".to_string(), is_final: true }, &mut ctx).await.unwrap();
        let indices: Vec<_> = frames.iter().filter_map(|f| match f { Frame::Sentence { index, .. } => Some(*index), _ => None }).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
