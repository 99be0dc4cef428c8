//! Playback pipeline (spec §4.5)
//!
//! Narrowband transport gets TTS audio resampled to the carrier's PSTN
//! rate, high-pass filtered, RMS-normalized, and soft-limited. HD
//! transport passes through untouched at the native rate. A small
//! cache of pre-synthesized filler phrases ("One moment.") lets the
//! coordinator play something the instant it enters THINKING, instead
//! of waiting on the brain's first token.

use std::collections::HashMap;
use std::sync::Arc;

use rubato::{FftFixedIn, Resampler};
use tokio::sync::RwLock;
use tracing::warn;

use crate::codec::encode_mulaw;
use voice_agent_core::traits::{TextToSpeech, TtsAudio, TtsRequest};
use voice_agent_core::{AudioFrame, Channels, SampleRate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackProfile {
    /// Resample/high-pass/normalize/limit to the PSTN rate.
    Narrowband,
    /// Passthrough at the native synthesized rate.
    Hd,
}

/// TTS audio shaped for a specific transport profile and encoded to the
/// wire bytes the media-stream writer sends to the carrier.
#[derive(Debug, Clone)]
pub struct ShapedAudio {
    pub bytes: Vec<u8>,
    pub sample_rate_hz: u32,
}

impl ShapedAudio {
    /// Playback duration of `bytes`: µ-law is one byte per sample.
    pub fn duration_ms(&self) -> u64 {
        (self.bytes.len() as u64 * 1000) / self.sample_rate_hz as u64
    }
}

const NORMALIZE_TARGET_RMS: f32 = 0.2;
const LIMITER_CEILING: f32 = 0.95;

/// Apply the narrowband shaping chain (resample, high-pass, normalize,
/// limit) or pass through at native rate for HD, then µ-law encode the
/// result for the carrier.
pub fn shape_for_profile(frame: &AudioFrame, profile: PlaybackProfile, pstn_sample_rate_hz: u32) -> ShapedAudio {
    let shaped = match profile {
        PlaybackProfile::Hd => frame.clone(),
        PlaybackProfile::Narrowband => {
            let resampled = resample(frame, pstn_sample_rate_hz);
            let filtered = high_pass(&resampled, 100.0);
            let normalized = normalize(&filtered, NORMALIZE_TARGET_RMS);
            limit(&normalized, LIMITER_CEILING)
        }
    };
    let bytes = encode_mulaw(&shaped);
    ShapedAudio { bytes, sample_rate_hz: shaped.sample_rate.as_hz() }
}

/// Resample `frame` to `target_hz` without the rest of the narrowband
/// shaping chain. Used to bring playback audio down to the ingest rate
/// for the echo canceller's reference buffer (spec §4.2 AEC).
pub fn resample_to_rate(frame: &AudioFrame, target_hz: u32) -> AudioFrame {
    resample(frame, target_hz)
}

fn resample(frame: &AudioFrame, target_hz: u32) -> AudioFrame {
    let from_hz = frame.sample_rate.as_hz();
    if from_hz == target_hz {
        return frame.clone();
    }
    if frame.samples.len() < 64 {
        return resample_linear(frame, target_hz);
    }

    let chunk_size = frame.samples.len().min(1024);
    match FftFixedIn::<f32>::new(from_hz as usize, target_hz as usize, chunk_size, 2, 1) {
        Ok(mut resampler) => match resampler.process(&[frame.samples.clone()], None) {
            Ok(output) => {
                let rate = SampleRate::from_hz(target_hz).unwrap_or(frame.sample_rate);
                AudioFrame::new(output[0].clone(), rate, frame.channels, frame.timestamp_ms)
            }
            Err(e) => {
                warn!(error = %e, "rubato resample failed, using linear fallback");
                resample_linear(frame, target_hz)
            }
        },
        Err(e) => {
            warn!(error = %e, "rubato init failed, using linear fallback");
            resample_linear(frame, target_hz)
        }
    }
}

fn resample_linear(frame: &AudioFrame, target_hz: u32) -> AudioFrame {
    let ratio = target_hz as f64 / frame.sample_rate.as_hz() as f64;
    let new_len = (frame.samples.len() as f64 * ratio) as usize;
    let mut out = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let floor = src_idx.floor() as usize;
        let ceil = (floor + 1).min(frame.samples.len().saturating_sub(1));
        let frac = (src_idx - floor as f64) as f32;
        let sample = frame.samples[floor] * (1.0 - frac) + frame.samples[ceil] * frac;
        out.push(sample);
    }
    let rate = SampleRate::from_hz(target_hz).unwrap_or(frame.sample_rate);
    AudioFrame::new(out, rate, frame.channels, frame.timestamp_ms)
}

fn high_pass(frame: &AudioFrame, cutoff_hz: f32) -> AudioFrame {
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let dt = 1.0 / frame.sample_rate.as_hz() as f32;
    let alpha = rc / (rc + dt);

    let mut prev_in = 0.0f32;
    let mut prev_out = 0.0f32;
    let filtered: Vec<f32> = frame
        .samples
        .iter()
        .map(|&x| {
            let y = alpha * (prev_out + x - prev_in);
            prev_in = x;
            prev_out = y;
            y
        })
        .collect();

    AudioFrame::new(filtered, frame.sample_rate, frame.channels, frame.timestamp_ms)
}

fn normalize(frame: &AudioFrame, target_rms: f32) -> AudioFrame {
    let rms = frame.rms();
    if rms < 1e-6 {
        return frame.clone();
    }
    let gain = target_rms / rms;
    let scaled: Vec<f32> = frame.samples.iter().map(|&s| s * gain).collect();
    AudioFrame::new(scaled, frame.sample_rate, frame.channels, frame.timestamp_ms)
}

fn limit(frame: &AudioFrame, ceiling: f32) -> AudioFrame {
    let limited: Vec<f32> = frame.samples.iter().map(|&s| s.clamp(-ceiling, ceiling)).collect();
    AudioFrame::new(limited, frame.sample_rate, frame.channels, frame.timestamp_ms)
}

/// Pre-warms and caches synthesized "thinking filler" phrases so they
/// are playable with zero added latency when the coordinator enters
/// THINKING. Warming is idempotent; a phrase that fails to synthesize
/// is simply omitted (spec §4.5).
pub struct FillerCache {
    tts: Arc<dyn TextToSpeech>,
    voice_id: String,
    sample_rate_hz: u32,
    cache: RwLock<HashMap<String, TtsAudio>>,
}

impl FillerCache {
    pub fn new(tts: Arc<dyn TextToSpeech>, voice_id: String, sample_rate_hz: u32) -> Self {
        Self { tts, voice_id, sample_rate_hz, cache: RwLock::new(HashMap::new()) }
    }

    pub async fn warm(&self, phrases: &[&str]) {
        for &phrase in phrases {
            if self.cache.read().await.contains_key(phrase) {
                continue;
            }
            let request = TtsRequest {
                text: phrase.to_string(),
                voice_id: self.voice_id.clone(),
                rate: None,
                language: None,
                sample_rate_hz: self.sample_rate_hz,
            };
            match self.tts.synthesize(&request).await {
                Ok(audio) => {
                    self.cache.write().await.insert(phrase.to_string(), audio);
                }
                Err(e) => {
                    warn!(phrase, error = %e, "filler phrase synthesis failed, omitting from cache");
                }
            }
        }
    }

    pub async fn get(&self, phrase: &str) -> Option<TtsAudio> {
        self.cache.read().await.get(phrase).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(sample_rate: SampleRate, len: usize, amplitude: f32) -> AudioFrame {
        AudioFrame::new(vec![amplitude; len], sample_rate, Channels::Mono, 0)
    }

    #[test]
    fn hd_profile_is_passthrough() {
        let frame = tone(SampleRate::Hz24000, 200, 0.5);
        let shaped = shape_for_profile(&frame, PlaybackProfile::Hd, 8000);
        assert_eq!(shaped.sample_rate_hz, 24_000);
        assert_eq!(shaped.bytes.len(), 200);
    }

    #[test]
    fn narrowband_profile_resamples_to_pstn_rate() {
        let frame = tone(SampleRate::Hz24000, 2400, 0.1);
        let shaped = shape_for_profile(&frame, PlaybackProfile::Narrowband, 8000);
        assert_eq!(shaped.sample_rate_hz, 8_000);
    }

    #[test]
    fn shaped_audio_duration_matches_mulaw_byte_count() {
        let frame = tone(SampleRate::Hz8000, 8000, 0.1);
        let shaped = shape_for_profile(&frame, PlaybackProfile::Hd, 8000);
        assert_eq!(shaped.duration_ms(), 1000);
    }

    #[test]
    fn limiter_clamps_to_ceiling() {
        let frame = tone(SampleRate::Hz8000, 100, 2.0);
        let limited = limit(&frame, LIMITER_CEILING);
        assert!(limited.samples.iter().all(|&s| s.abs() <= LIMITER_CEILING));
    }

    #[test]
    fn normalize_brings_quiet_audio_toward_target_rms() {
        let frame = tone(SampleRate::Hz8000, 400, 0.01);
        let normalized = normalize(&frame, NORMALIZE_TARGET_RMS);
        assert!(normalized.rms() > frame.rms());
    }

    #[tokio::test]
    async fn filler_cache_warm_is_idempotent_and_omits_failures() {
        struct FlakyTts;
        #[async_trait::async_trait]
        impl TextToSpeech for FlakyTts {
            async fn synthesize(&self, request: &TtsRequest) -> voice_agent_core::Result<TtsAudio> {
                if request.text == "fails" {
                    return Err(voice_agent_core::Error::Validation("synth failed".into()));
                }
                Ok(TtsAudio { bytes: vec![0u8; 4], content_type: "audio/l16".into() })
            }
            fn name(&self) -> &str {
                "flaky"
            }
        }

        let cache = FillerCache::new(Arc::new(FlakyTts), "voice-1".into(), 8000);
        cache.warm(&["One moment.", "fails"]).await;
        cache.warm(&["One moment.", "fails"]).await;

        assert!(cache.get("One moment.").await.is_some());
        assert!(cache.get("fails").await.is_none());
    }
}
