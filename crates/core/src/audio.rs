//! Audio frame types and narrowband codec decoding
//!
//! The runtime's internal representation is always 32-bit float PCM, mono,
//! at a fixed sample rate. Carrier codecs are decoded into this shape at
//! the media-stream boundary (see `voice_agent_pipeline::codec`); nothing
//! downstream of ingest needs to know which codec a call negotiated.

use serde::{Deserialize, Serialize};

/// Sample rates the runtime is expected to operate at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz8000,
    Hz16000,
    Hz24000,
    Hz48000,
}

impl SampleRate {
    pub fn as_hz(self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8_000,
            SampleRate::Hz16000 => 16_000,
            SampleRate::Hz24000 => 24_000,
            SampleRate::Hz48000 => 48_000,
        }
    }

    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            8_000 => Some(SampleRate::Hz8000),
            16_000 => Some(SampleRate::Hz16000),
            24_000 => Some(SampleRate::Hz24000),
            48_000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channels {
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// A block of PCM audio moving through the ingest/endpointer/playback path.
///
/// Samples are normalized to `[-1.0, 1.0]` floats; conversion to/from 16-bit
/// integer PCM happens at the codec and HTTP client boundaries.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: SampleRate,
    pub channels: Channels,
    /// Milliseconds since the call's media stream opened.
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate, channels: Channels, timestamp_ms: u64) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            timestamp_ms,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        let per_channel = self.samples.len() / self.channels.count().max(1);
        (per_channel as u64 * 1000) / self.sample_rate.as_hz() as u64
    }

    /// Root-mean-square amplitude of this frame, used by the endpointer's
    /// adaptive gating.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }

    /// Peak absolute amplitude, the second adaptive-gating signal.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Convert to 16-bit PCM bytes (little-endian), the wire format the STT
    /// and TTS microservices speak.
    pub fn to_pcm16_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for &s in &self.samples {
            let clamped = s.clamp(-1.0, 1.0);
            let v = (clamped * i16::MAX as f32) as i16;
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_pcm16_bytes(bytes: &[u8], sample_rate: SampleRate, channels: Channels, timestamp_ms: u64) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / i16::MAX as f32)
            .collect();
        Self::new(samples, sample_rate, channels, timestamp_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        let frame = AudioFrame::new(vec![0.0; 160], SampleRate::Hz16000, Channels::Mono, 0);
        assert_eq!(frame.rms(), 0.0);
    }

    #[test]
    fn pcm16_roundtrip_is_close() {
        let samples = vec![0.5, -0.5, 0.25, -1.0, 1.0];
        let frame = AudioFrame::new(samples.clone(), SampleRate::Hz16000, Channels::Mono, 0);
        let bytes = frame.to_pcm16_bytes();
        let back = AudioFrame::from_pcm16_bytes(&bytes, SampleRate::Hz16000, Channels::Mono, 0);
        for (a, b) in samples.iter().zip(back.samples.iter()) {
            assert!((a - b).abs() < 0.001);
        }
    }

    #[test]
    fn duration_ms_matches_sample_count() {
        let frame = AudioFrame::new(vec![0.0; 320], SampleRate::Hz16000, Channels::Mono, 0);
        assert_eq!(frame.duration_ms(), 20);
    }
}
