//! Carrier media frame decode (spec §6)
//!
//! The media WebSocket delivers base64-encoded audio in one of the
//! negotiated codecs. This module turns those bytes into
//! [`voice_agent_core::AudioFrame`]s at the runtime's internal sample
//! rate, and tracks consecutive decode failures so the caller can
//! trigger a codec-fallback restart per call.

use thiserror::Error;
use voice_agent_core::{AudioFrame, Channels, SampleRate};

#[derive(Error, Debug, Clone)]
pub enum CodecError {
    #[error("unsupported or unnegotiated codec: {0}")]
    Unsupported(String),

    #[error("malformed {codec} frame: {message}")]
    Malformed { codec: &'static str, message: String },
}

/// Codecs the media stream may negotiate (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedCodec {
    /// G.711 µ-law, 8 kHz — the default PSTN codec and Telnyx's
    /// preferred codec (`TELNYX_PREFERRED_CODEC=PCMU`).
    PcmuNarrowband,
    AmrWideband,
    G722,
    Opus,
}

impl NegotiatedCodec {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PCMU" | "MULAW" | "ULAW" => Some(Self::PcmuNarrowband),
            "AMR-WB" | "AMRWB" => Some(Self::AmrWideband),
            "G722" => Some(Self::G722),
            "OPUS" => Some(Self::Opus),
            _ => None,
        }
    }

    fn source_rate(self) -> SampleRate {
        match self {
            NegotiatedCodec::PcmuNarrowband => SampleRate::Hz8000,
            NegotiatedCodec::AmrWideband => SampleRate::Hz16000,
            NegotiatedCodec::G722 => SampleRate::Hz16000,
            NegotiatedCodec::Opus => SampleRate::Hz48000,
        }
    }
}

/// Result of decoding one carrier media frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub frame: AudioFrame,
}

/// G.711 µ-law → 16-bit linear PCM decode table (ITU-T G.711).
fn mulaw_decode_sample(byte: u8) -> i16 {
    const BIAS: i16 = 0x84;
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;
    let mut sample = ((mantissa as i16) << 3) + BIAS;
    sample <<= exponent;
    sample -= BIAS;
    if sign != 0 {
        -sample
    } else {
        sample
    }
}

fn decode_mulaw(bytes: &[u8], timestamp_ms: u64) -> AudioFrame {
    let samples = bytes.iter().map(|&b| mulaw_decode_sample(b) as f32 / i16::MAX as f32).collect();
    AudioFrame::new(samples, SampleRate::Hz8000, Channels::Mono, timestamp_ms)
}

/// 16-bit linear PCM -> G.711 µ-law (ITU-T G.711), the inverse of
/// [`mulaw_decode_sample`]. Used to encode playback audio for the media
/// stream back out over PCMU, the only codec this runtime writes.
fn mulaw_encode_sample(pcm: i16) -> u8 {
    const BIAS: i16 = 0x84;
    const CLIP: i16 = 32635;

    let sign = if pcm < 0 { 0x80 } else { 0x00 };
    let magnitude = pcm.unsigned_abs().min(CLIP as u16) as i16 + BIAS;

    let exponent = (0..8).rev().find(|&e| (magnitude >> (e + 3)) != 0).unwrap_or(0) as u8;
    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    let byte = sign | (exponent << 4) | mantissa;
    !byte
}

/// Encode an internal PCM frame to PCMU bytes, one byte per sample.
/// Callers are expected to have already resampled to 8 kHz mono (see
/// `voice_agent_pipeline::playback::shape_for_profile`).
pub fn encode_mulaw(frame: &AudioFrame) -> Vec<u8> {
    frame
        .samples
        .iter()
        .map(|&s| {
            let clamped = s.clamp(-1.0, 1.0);
            mulaw_encode_sample((clamped * i16::MAX as f32) as i16)
        })
        .collect()
}

/// Decodes negotiated carrier codecs into internal PCM frames and counts
/// consecutive failures so the session coordinator can trigger a
/// codec-fallback restart (spec §6, `STREAM_RESTART_MAX`).
pub struct FrameDecoder {
    codec: NegotiatedCodec,
    consecutive_failures: u32,
    restart_count: u32,
    restart_max: u32,
}

impl FrameDecoder {
    pub fn new(codec: NegotiatedCodec, restart_max: u32) -> Self {
        Self { codec, consecutive_failures: 0, restart_count: 0, restart_max }
    }

    pub fn codec(&self) -> NegotiatedCodec {
        self.codec
    }

    /// Decode one frame. On failure, increments the consecutive-failure
    /// counter; on success, resets it. Callers check
    /// [`Self::should_restart`] after every failure.
    pub fn decode(&mut self, bytes: &[u8], timestamp_ms: u64) -> Result<DecodedFrame, CodecError> {
        let result = match self.codec {
            NegotiatedCodec::PcmuNarrowband => {
                if bytes.is_empty() {
                    Err(CodecError::Malformed { codec: "PCMU", message: "empty frame".into() })
                } else {
                    Ok(decode_mulaw(bytes, timestamp_ms))
                }
            }
            // Fully decoding AMR-WB/G.722/Opus requires vendored codec
            // libraries this workspace does not carry; the carrier's
            // preferred fallback is always PCMU (spec §6, `TELNYX_PREFERRED_CODEC`),
            // so an unsupported negotiated codec surfaces as a decode
            // failure and drives the same restart path a malformed
            // PCMU frame would.
            other => Err(CodecError::Unsupported(format!("{other:?}"))),
        };

        match &result {
            Ok(_) => self.consecutive_failures = 0,
            Err(_) => self.consecutive_failures += 1,
        }

        result.map(|frame| DecodedFrame { frame })
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// True once consecutive failures exceed the threshold and a restart
    /// has not already exhausted `STREAM_RESTART_MAX` for this call.
    pub fn should_restart(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold && self.restart_count < self.restart_max
    }

    pub fn restarts_exhausted(&self) -> bool {
        self.restart_count >= self.restart_max
    }

    /// Record a codec-fallback restart, falling back to PCMU and
    /// resetting the failure counter.
    pub fn restart_with_fallback(&mut self) {
        self.codec = NegotiatedCodec::PcmuNarrowband;
        self.consecutive_failures = 0;
        self.restart_count += 1;
    }
}
