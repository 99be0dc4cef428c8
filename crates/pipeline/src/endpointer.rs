//! Streaming STT endpointer (spec §4.2)
//!
//! Consumes 16-bit-equivalent PCM frames one at a time and decides
//! where one utterance ends and the next begins, using adaptive
//! noise-floor gating plus a handful of watchdogs so a crashed or
//! silent carrier stream can't wedge a call in `SPEAKING` forever.
//! Dispatches the accumulated utterance to an [`voice_agent_core::traits::SpeechToText`]
//! implementation at finalize time.

use std::collections::VecDeque;
use std::sync::Arc;

use voice_agent_core::traits::SpeechToText;
use voice_agent_core::AudioFrame;
use voice_agent_config::EndpointerConfig;

use crate::aec::EchoCanceller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointerState {
    Idle,
    Speaking,
    Trailing,
    Finalizing,
}

/// Output of feeding one frame to the endpointer.
#[derive(Debug, Clone)]
pub enum EndpointerEvent {
    /// No state-visible event this frame.
    None,
    VoiceStart,
    /// Speculative transcript; never enters conversation history.
    Partial { text: String },
    /// Utterance boundary reached; `text` is empty with `error` set if
    /// the STT call failed (spec §4.2 error policy).
    Final { text: String, error: Option<String> },
}

struct HighPassFilter {
    alpha: f32,
    prev_input: f32,
    prev_output: f32,
}

impl HighPassFilter {
    fn new(cutoff_hz: f32, sample_rate_hz: f32) -> Self {
        let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
        let dt = 1.0 / sample_rate_hz;
        let alpha = rc / (rc + dt);
        Self { alpha, prev_input: 0.0, prev_output: 0.0 }
    }

    fn apply(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(samples.len());
        for &x in samples {
            let y = self.alpha * (self.prev_output + x - self.prev_input);
            self.prev_input = x;
            self.prev_output = y;
            out.push(y);
        }
        out
    }
}

/// Per-call streaming endpointer. One instance per live call, owned by
/// the session coordinator.
pub struct Endpointer {
    config: EndpointerConfig,
    stt: Arc<dyn SpeechToText>,
    sample_rate_hz: u32,
    language_hint: Option<String>,
    decoding_prompt: Option<String>,

    state: EndpointerState,
    high_pass: HighPassFilter,

    pre_roll: VecDeque<AudioFrame>,
    pre_roll_ms_budget: u64,

    utterance: Vec<f32>,
    consecutive_above: u32,
    below_threshold_ms: u64,
    speaking_ms: u64,
    ms_since_last_partial: u64,
    partial_emitted_once: bool,

    noise_floor_rms: f32,
    noise_floor_peak: f32,
    samples_seen: u32,

    ms_since_last_frame_reset: u64,
    post_playback_grace_remaining_ms: u64,

    gating_enabled: bool,
    aec: Option<EchoCanceller>,
}

impl Endpointer {
    pub fn new(
        config: EndpointerConfig,
        stt: Arc<dyn SpeechToText>,
        sample_rate_hz: u32,
        language_hint: Option<String>,
        decoding_prompt: Option<String>,
    ) -> Self {
        let gating_enabled = config.gating_enabled;
        let high_pass = HighPassFilter::new(config.highpass_cutoff_hz, sample_rate_hz as f32);
        let aec = config.aec_enabled.then(|| EchoCanceller::new(config.aec_reference_horizon_ms, sample_rate_hz));
        Self {
            pre_roll_ms_budget: config.pre_roll_ms,
            config,
            stt,
            sample_rate_hz,
            language_hint,
            decoding_prompt,
            state: EndpointerState::Idle,
            high_pass,
            pre_roll: VecDeque::new(),
            utterance: Vec::new(),
            consecutive_above: 0,
            below_threshold_ms: 0,
            speaking_ms: 0,
            ms_since_last_partial: 0,
            partial_emitted_once: false,
            noise_floor_rms: 0.0,
            noise_floor_peak: 0.0,
            samples_seen: 0,
            ms_since_last_frame_reset: 0,
            post_playback_grace_remaining_ms: 0,
            gating_enabled,
            aec,
        }
    }

    /// Feed newly played audio (already resampled to this endpointer's
    /// ingest rate) into the echo canceller's reference buffer, if AEC is
    /// enabled for this call. A no-op otherwise.
    pub fn push_playback_reference(&mut self, samples: &[f32]) {
        if let Some(aec) = self.aec.as_mut() {
            aec.push_reference(samples);
        }
    }

    pub fn state(&self) -> EndpointerState {
        self.state
    }

    /// Start the post-playback grace window: ignore speech detection
    /// for a duration bounded to `[POST_PLAYBACK_GRACE_MIN_MS, POST_PLAYBACK_GRACE_MAX_MS]`,
    /// sized to the just-played segment's length (spec §4.2).
    pub fn arm_post_playback_grace(&mut self, segment_duration_ms: u64) {
        self.post_playback_grace_remaining_ms =
            segment_duration_ms.clamp(self.config.post_playback_grace_min_ms, self.config.post_playback_grace_max_ms);
    }

    fn effective_thresholds(&self) -> (f32, f32) {
        if !self.gating_enabled || self.samples_seen < self.config.min_samples {
            (self.config.rms_floor_min, self.config.peak_floor_min)
        } else {
            (
                (self.noise_floor_rms * self.config.rms_multiplier).max(self.config.rms_floor_min),
                (self.noise_floor_peak * self.config.peak_multiplier).max(self.config.peak_floor_min),
            )
        }
    }

    fn update_noise_floor(&mut self, rms: f32, peak: f32) {
        let alpha = self.config.noise_floor_alpha;
        if self.samples_seen == 0 {
            self.noise_floor_rms = rms;
            self.noise_floor_peak = peak;
        } else {
            self.noise_floor_rms = alpha * rms + (1.0 - alpha) * self.noise_floor_rms;
            self.noise_floor_peak = alpha * peak + (1.0 - alpha) * self.noise_floor_peak;
        }
        self.samples_seen = self.samples_seen.saturating_add(1);
    }

    fn push_pre_roll(&mut self, frame: AudioFrame) {
        self.pre_roll.push_back(frame);
        let mut total_ms: u64 = self.pre_roll.iter().map(|f| f.duration_ms()).sum();
        while total_ms > self.pre_roll_ms_budget {
            if let Some(front) = self.pre_roll.pop_front() {
                total_ms -= front.duration_ms();
            } else {
                break;
            }
        }
    }

    fn drain_pre_roll_samples(&mut self) -> Vec<f32> {
        self.pre_roll.drain(..).flat_map(|f| f.samples).collect()
    }

    /// Feed one decoded audio frame. Returns any event this frame
    /// produced: `VoiceStart`, a speculative `Partial`, or a `Final`
    /// once an utterance boundary is reached.
    pub async fn push_frame(&mut self, frame: AudioFrame) -> EndpointerEvent {
        self.ms_since_last_frame_reset = 0;
        let frame_ms = frame.duration_ms();

        if self.post_playback_grace_remaining_ms > 0 {
            self.post_playback_grace_remaining_ms = self.post_playback_grace_remaining_ms.saturating_sub(frame_ms);
            self.push_pre_roll(frame);
            return EndpointerEvent::None;
        }

        let echo_cancelled = match self.aec.as_mut() {
            Some(aec) => aec.cancel(&frame.samples),
            None => frame.samples.clone(),
        };
        let filtered_samples = self.high_pass.apply(&echo_cancelled);
        let filtered = AudioFrame::new(filtered_samples, frame.sample_rate, frame.channels, frame.timestamp_ms);

        let rms = filtered.rms();
        let peak = filtered.peak();

        match self.state {
            EndpointerState::Idle => {
                self.update_noise_floor(rms, peak);
                self.push_pre_roll(filtered);

                let (rms_threshold, peak_threshold) = self.effective_thresholds();
                if rms >= rms_threshold && peak >= peak_threshold {
                    self.consecutive_above += 1;
                    if self.consecutive_above >= self.config.frames_required {
                        self.state = EndpointerState::Speaking;
                        self.utterance = self.drain_pre_roll_samples();
                        self.speaking_ms = self.utterance.len() as u64 * 1000
                            / self.sample_rate_hz.max(1) as u64;
                        self.below_threshold_ms = 0;
                        self.ms_since_last_partial = 0;
                        self.partial_emitted_once = false;
                        return EndpointerEvent::VoiceStart;
                    }
                } else {
                    self.consecutive_above = 0;
                }
                EndpointerEvent::None
            }

            EndpointerState::Speaking | EndpointerState::Trailing => {
                self.utterance.extend_from_slice(&filtered.samples);
                self.speaking_ms += frame_ms;
                self.ms_since_last_partial += frame_ms;

                let (rms_threshold, peak_threshold) = self.effective_thresholds();
                let above = rms >= rms_threshold && peak >= peak_threshold;

                if above {
                    self.below_threshold_ms = 0;
                    self.state = EndpointerState::Speaking;
                } else {
                    self.below_threshold_ms += frame_ms;
                    self.state = EndpointerState::Trailing;
                }

                if self.below_threshold_ms >= self.config.silence_end_ms {
                    return self.finalize().await;
                }

                if self.speaking_ms >= self.config.late_final_watchdog_ms {
                    return self.finalize().await;
                }

                if self.speaking_ms >= self.config.partial_min_ms
                    && self.ms_since_last_partial >= self.config.partial_interval_ms
                {
                    self.ms_since_last_partial = 0;
                    self.partial_emitted_once = true;
                    let pcm = pcm16_from_f32(&self.utterance);
                    return match self.stt.transcribe(&pcm, self.language_hint.as_deref(), self.decoding_prompt.as_deref()).await {
                        Ok(result) => EndpointerEvent::Partial { text: result.text },
                        Err(_) => EndpointerEvent::None,
                    };
                }

                EndpointerEvent::None
            }

            EndpointerState::Finalizing => EndpointerEvent::None,
        }
    }

    /// Called when the carrier stops sending frames for
    /// `NO_FRAME_FINALIZE_MS` while `SPEAKING`/`TRAILING` (spec §4.2
    /// "no-frame finalize" — carriers often stop frames immediately on
    /// hangup, so this recovers the last utterance).
    pub async fn tick_no_frames(&mut self, elapsed_ms: u64) -> EndpointerEvent {
        if matches!(self.state, EndpointerState::Speaking | EndpointerState::Trailing) {
            self.ms_since_last_frame_reset += elapsed_ms;
            if self.ms_since_last_frame_reset >= self.config.no_frame_finalize_ms {
                return self.finalize().await;
            }
        }
        EndpointerEvent::None
    }

    async fn finalize(&mut self) -> EndpointerEvent {
        self.state = EndpointerState::Finalizing;
        self.apply_tail_cushion();

        let pcm = pcm16_from_f32(&self.utterance);
        let event = match self.stt.transcribe(&pcm, self.language_hint.as_deref(), self.decoding_prompt.as_deref()).await {
            Ok(result) => EndpointerEvent::Final { text: result.text, error: None },
            Err(e) => EndpointerEvent::Final { text: String::new(), error: Some(e.to_string()) },
        };

        self.reset_to_idle();
        event
    }

    /// Trim buffered trailing silence back to `tail_cushion_ms` past the
    /// last above-threshold frame, independent of `silence_end_ms` (which
    /// only bounds how long we wait before finalizing, not how much of
    /// that wait gets shipped to the STT). A no-op when less trailing
    /// silence than the cushion was actually buffered, e.g. the
    /// late-final or no-frame watchdogs firing mid-speech.
    fn apply_tail_cushion(&mut self) {
        let below_threshold_samples = self.below_threshold_ms * self.sample_rate_hz as u64 / 1000;
        let cushion_samples = self.config.tail_cushion_ms * self.sample_rate_hz as u64 / 1000;
        if below_threshold_samples > cushion_samples {
            let excess = (below_threshold_samples - cushion_samples) as usize;
            let excess = excess.min(self.utterance.len());
            self.utterance.truncate(self.utterance.len() - excess);
        }
    }

    fn reset_to_idle(&mut self) {
        self.state = EndpointerState::Idle;
        self.utterance.clear();
        self.consecutive_above = 0;
        self.below_threshold_ms = 0;
        self.speaking_ms = 0;
        self.ms_since_last_partial = 0;
        self.partial_emitted_once = false;
    }
}

fn pcm16_from_f32(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let v = (clamped * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use voice_agent_core::{Channels, SampleRate};
    use voice_agent_core::transcript::TranscriptResult;

    struct MockStt {
        text: String,
    }

    #[async_trait]
    impl SpeechToText for MockStt {
        async fn transcribe(&self, _pcm16: &[u8], _lang: Option<&str>, _prompt: Option<&str>) -> voice_agent_core::Result<TranscriptResult> {
            Ok(TranscriptResult { text: self.text.clone(), confidence: 0.9, is_final: true, words: vec![] })
        }
        fn name(&self) -> &str {
            "mock"
        }
    }

    fn test_config() -> EndpointerConfig {
        EndpointerConfig {
            pre_roll_ms: 40,
            frames_required: 2,
            silence_end_ms: 40,
            tail_cushion_ms: 0,
            min_samples: 1000,
            gating_enabled: false,
            rms_floor_min: 0.05,
            peak_floor_min: 0.05,
            no_frame_finalize_ms: 100,
            late_final_watchdog_ms: 10_000,
            partial_min_ms: 20,
            partial_interval_ms: 20,
            ..EndpointerConfig::default()
        }
    }

    fn loud_frame(ts: u64) -> AudioFrame {
        AudioFrame::new(vec![0.5; 320], SampleRate::Hz16000, Channels::Mono, ts)
    }

    fn silent_frame(ts: u64) -> AudioFrame {
        AudioFrame::new(vec![0.0; 320], SampleRate::Hz16000, Channels::Mono, ts)
    }

    #[tokio::test]
    async fn voice_start_after_frames_required_consecutive_loud_frames() {
        let stt = Arc::new(MockStt { text: "hello".into() });
        let mut ep = Endpointer::new(test_config(), stt, 16_000, None, None);

        let e1 = ep.push_frame(loud_frame(0)).await;
        assert!(matches!(e1, EndpointerEvent::None));
        let e2 = ep.push_frame(loud_frame(20)).await;
        assert!(matches!(e2, EndpointerEvent::VoiceStart));
        assert_eq!(ep.state(), EndpointerState::Speaking);
    }

    #[tokio::test]
    async fn silence_after_speaking_emits_final_within_silence_end_ms() {
        let stt = Arc::new(MockStt { text: "what time do you close".into() });
        let mut ep = Endpointer::new(test_config(), stt, 16_000, None, None);

        ep.push_frame(loud_frame(0)).await;
        ep.push_frame(loud_frame(20)).await;
        ep.push_frame(silent_frame(40)).await;
        let event = ep.push_frame(silent_frame(60)).await;

        match event {
            EndpointerEvent::Final { text, error } => {
                assert_eq!(text, "what time do you close");
                assert!(error.is_none());
            }
            other => panic!("expected Final, got {other:?}"),
        }
        assert_eq!(ep.state(), EndpointerState::Idle);
    }

    #[tokio::test]
    async fn no_frame_finalize_fires_while_speaking_without_silence() {
        let stt = Arc::new(MockStt { text: "hung up mid sentence".into() });
        let mut ep = Endpointer::new(test_config(), stt, 16_000, None, None);

        ep.push_frame(loud_frame(0)).await;
        ep.push_frame(loud_frame(20)).await;
        assert_eq!(ep.state(), EndpointerState::Speaking);

        let event = ep.tick_no_frames(150).await;
        match event {
            EndpointerEvent::Final { text, .. } => assert_eq!(text, "hung up mid sentence"),
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn post_playback_grace_suppresses_detection() {
        let stt = Arc::new(MockStt { text: "echo".into() });
        let mut ep = Endpointer::new(test_config(), stt, 16_000, None, None);
        ep.arm_post_playback_grace(50);

        let event = ep.push_frame(loud_frame(0)).await;
        assert!(matches!(event, EndpointerEvent::None));
        assert_eq!(ep.state(), EndpointerState::Idle);
    }

    #[tokio::test]
    async fn finalize_truncates_trailing_silence_to_tail_cushion() {
        struct CapturingStt {
            captured_len: std::sync::Mutex<usize>,
        }
        #[async_trait]
        impl SpeechToText for CapturingStt {
            async fn transcribe(&self, pcm16: &[u8], _lang: Option<&str>, _prompt: Option<&str>) -> voice_agent_core::Result<TranscriptResult> {
                *self.captured_len.lock().unwrap() = pcm16.len();
                Ok(TranscriptResult { text: "ok".into(), confidence: 0.9, is_final: true, words: vec![] })
            }
            fn name(&self) -> &str {
                "capturing"
            }
        }

        let mut config = test_config();
        config.silence_end_ms = 100;
        config.tail_cushion_ms = 20;
        let stt = Arc::new(CapturingStt { captured_len: std::sync::Mutex::new(0) });
        let mut ep = Endpointer::new(config, stt.clone(), 16_000, None, None);

        ep.push_frame(loud_frame(0)).await;
        ep.push_frame(loud_frame(20)).await;
        // 5 trailing silent frames (20ms each = 100ms) reach silence_end_ms.
        // Interim frames may emit speculative partials; only the last
        // frame's event (the utterance boundary) matters here.
        for i in 0..4 {
            ep.push_frame(silent_frame(40 + i * 20)).await;
        }
        let event = ep.push_frame(silent_frame(120)).await;
        assert!(matches!(event, EndpointerEvent::Final { .. }));

        // Speech (2 loud frames = 640 samples) plus only the 20ms cushion
        // (320 samples) of trailing silence should have reached the STT,
        // not the full 100ms of buffered trailing silence.
        let captured_samples = *stt.captured_len.lock().unwrap() / 2;
        assert_eq!(captured_samples, 640 + 320);
    }

    #[tokio::test]
    async fn stt_error_on_final_surfaces_empty_text_with_error_tag() {
        struct FailingStt;
        #[async_trait]
        impl SpeechToText for FailingStt {
            async fn transcribe(&self, _: &[u8], _: Option<&str>, _: Option<&str>) -> voice_agent_core::Result<TranscriptResult> {
                Err(voice_agent_core::Error::Validation("stt unavailable".into()))
            }
            fn name(&self) -> &str {
                "failing"
            }
        }

        let mut ep = Endpointer::new(test_config(), Arc::new(FailingStt), 16_000, None, None);
        ep.push_frame(loud_frame(0)).await;
        ep.push_frame(loud_frame(20)).await;
        ep.push_frame(silent_frame(40)).await;
        let event = ep.push_frame(silent_frame(60)).await;

        match event {
            EndpointerEvent::Final { text, error } => {
                assert!(text.is_empty());
                assert!(error.is_some());
            }
            other => panic!("expected Final, got {other:?}"),
        }
    }
}
