//! Process-wide settings, loaded once at startup from the environment.
//!
//! Every field maps to one of the variables enumerated in the external
//! interfaces surface: `PORT`, `MEDIA_STREAM_TOKEN`, `TELNYX_*`,
//! `WHISPER_URL`, `KOKORO_URL`/`COQUI_XTTS_URL`, `STT_*`, `TTS_*`,
//! `BRAIN_*`, `REDIS_URL`, `*_CONCURRENCY_CAP*`, `CAPACITY_TTL_SECONDS`,
//! `AUDIO_STORAGE_DIR`, `AUDIO_PUBLIC_BASE_URL`. An invalid value fails
//! startup rather than falling back silently.

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telnyx: TelnyxConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub brain: BrainConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub endpointer: EndpointerConfig,
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.capacity.validate()?;
        self.endpointer.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token the media-stream WebSocket upgrade must present.
    #[serde(default)]
    pub media_stream_token: String,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            media_stream_token: String::new(),
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".into(),
                message: "port cannot be 0".into(),
            });
        }
        if self.media_stream_token.is_empty() {
            tracing::warn!("MEDIA_STREAM_TOKEN is unset; media stream upgrades will all fail auth");
        }
        Ok(())
    }
}

/// Carrier (Telnyx) webhook signature, codec negotiation, and call-control
/// settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelnyxConfig {
    /// Max allowed clock skew, in seconds, between request timestamp and now.
    #[serde(default = "default_signature_skew_seconds")]
    pub signature_skew_seconds: i64,
    #[serde(default = "default_preferred_codec")]
    pub preferred_codec: String,
    /// Base URL of the carrier's call-control REST API, used to bridge a
    /// transferred call to its destination (spec §4.6 transfer_call).
    #[serde(default = "default_call_control_base_url")]
    pub call_control_base_url: String,
    /// Bearer credential for the call-control API. `None` leaves the
    /// `Authorization` header off entirely, which is only safe against a
    /// local stub in development.
    #[serde(default)]
    pub call_control_api_key: Option<String>,
}

fn default_signature_skew_seconds() -> i64 {
    300
}

fn default_preferred_codec() -> String {
    "PCMU".to_string()
}

fn default_call_control_base_url() -> String {
    "https://api.telnyx.com/v2".to_string()
}

impl Default for TelnyxConfig {
    fn default() -> Self {
        Self {
            signature_skew_seconds: default_signature_skew_seconds(),
            preferred_codec: default_preferred_codec(),
            call_control_base_url: default_call_control_base_url(),
            call_control_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: default_redis_url() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "default_whisper_url")]
    pub whisper_url: String,
    #[serde(default = "default_stt_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_stt_max_retries")]
    pub max_retries: u32,
}

fn default_whisper_url() -> String {
    "http://localhost:9000".to_string()
}

fn default_stt_timeout_ms() -> u64 {
    20_000
}

fn default_stt_max_retries() -> u32 {
    1
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            whisper_url: default_whisper_url(),
            timeout_ms: default_stt_timeout_ms(),
            max_retries: default_stt_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_kokoro_url")]
    pub kokoro_url: String,
    #[serde(default)]
    pub coqui_xtts_url: Option<String>,
    #[serde(default = "default_tts_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_tts_max_retries")]
    pub max_retries: u32,
    /// No single TTS chunk should exceed this many characters (§4.4).
    #[serde(default = "default_tts_chunk_max_chars")]
    pub chunk_max_chars: usize,
}

fn default_kokoro_url() -> String {
    "http://localhost:8880".to_string()
}

fn default_tts_timeout_ms() -> u64 {
    10_000
}

fn default_tts_max_retries() -> u32 {
    1
}

fn default_tts_chunk_max_chars() -> usize {
    140
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            kokoro_url: default_kokoro_url(),
            coqui_xtts_url: None,
            timeout_ms: default_tts_timeout_ms(),
            max_retries: default_tts_max_retries(),
            chunk_max_chars: default_tts_chunk_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    #[serde(default = "default_brain_url")]
    pub url: String,
    #[serde(default = "default_brain_timeout_ms")]
    pub non_streaming_timeout_ms: u64,
    #[serde(default = "default_brain_first_audio_ms")]
    pub streaming_first_audio_timeout_ms: u64,
    #[serde(default = "default_brain_ping_ms")]
    pub streaming_ping_timeout_ms: u64,
    #[serde(default = "default_segment_min_chars")]
    pub segment_min_chars: usize,
    #[serde(default = "default_segment_next_chars")]
    pub segment_next_chars: usize,
    #[serde(default = "default_first_audio_max_ms")]
    pub first_audio_max_ms: u64,
}

fn default_brain_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_brain_timeout_ms() -> u64 {
    8_000
}

fn default_brain_first_audio_ms() -> u64 {
    2_000
}

fn default_brain_ping_ms() -> u64 {
    15_000
}

fn default_segment_min_chars() -> usize {
    40
}

fn default_segment_next_chars() -> usize {
    80
}

fn default_first_audio_max_ms() -> u64 {
    1_500
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            url: default_brain_url(),
            non_streaming_timeout_ms: default_brain_timeout_ms(),
            streaming_first_audio_timeout_ms: default_brain_first_audio_ms(),
            streaming_ping_timeout_ms: default_brain_ping_ms(),
            segment_min_chars: default_segment_min_chars(),
            segment_next_chars: default_segment_next_chars(),
            first_audio_max_ms: default_first_audio_max_ms(),
        }
    }
}

/// Control-plane reporting endpoint (spec §4.4, §6): `call_started`,
/// `caller_message`, `call_ended` are posted here, best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default = "default_control_plane_url")]
    pub url: String,
    #[serde(default = "default_control_plane_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_control_plane_url() -> String {
    "http://localhost:7000".to_string()
}

fn default_control_plane_timeout_ms() -> u64 {
    5_000
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self { url: default_control_plane_url(), timeout_ms: default_control_plane_timeout_ms() }
    }
}

/// Admission caps; `-1` on any field means "unlimited" and is handled at
/// the tenant-config layer, not here (these are process-wide fallbacks
/// used only when a tenant's own caps are absent, which validation
/// otherwise rejects).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    #[serde(default = "default_global_concurrency_cap")]
    pub global_concurrency_cap: i64,
    #[serde(default = "default_capacity_ttl_seconds")]
    pub capacity_ttl_seconds: u64,
    #[serde(default = "default_call_ttl_ms")]
    pub call_ttl_ms: u64,
}

fn default_global_concurrency_cap() -> i64 {
    50
}

fn default_capacity_ttl_seconds() -> u64 {
    60
}

fn default_call_ttl_ms() -> u64 {
    30 * 60 * 1000
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            global_concurrency_cap: default_global_concurrency_cap(),
            capacity_ttl_seconds: default_capacity_ttl_seconds(),
            call_ttl_ms: default_call_ttl_ms(),
        }
    }
}

impl CapacityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.global_concurrency_cap != -1 && self.global_concurrency_cap < 1 {
            return Err(ConfigError::InvalidValue {
                field: "capacity.global_concurrency_cap".into(),
                message: "must be -1 (unlimited) or >= 1".into(),
            });
        }
        if self.call_ttl_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "capacity.call_ttl_ms".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_audio_storage_dir")]
    pub storage_dir: String,
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default = "default_target_sample_rate")]
    pub target_sample_rate_hz: u32,
}

fn default_audio_storage_dir() -> String {
    "/tmp/voice-call-runtime/audio".to_string()
}

fn default_target_sample_rate() -> u32 {
    16_000
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_audio_storage_dir(),
            public_base_url: None,
            target_sample_rate_hz: default_target_sample_rate(),
        }
    }
}

/// Endpointer tuning (§4.2). Loaded centrally so every call's endpointer
/// starts from the same process-wide defaults; a tenant config cannot
/// currently override these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointerConfig {
    #[serde(default = "default_pre_roll_ms")]
    pub pre_roll_ms: u64,
    #[serde(default = "default_frames_required")]
    pub frames_required: u32,
    #[serde(default = "default_silence_end_ms")]
    pub silence_end_ms: u64,
    #[serde(default = "default_tail_cushion_ms")]
    pub tail_cushion_ms: u64,
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
    #[serde(default = "default_noise_floor_alpha")]
    pub noise_floor_alpha: f32,
    #[serde(default = "default_rms_multiplier")]
    pub rms_multiplier: f32,
    #[serde(default = "default_peak_multiplier")]
    pub peak_multiplier: f32,
    #[serde(default = "default_rms_floor_min")]
    pub rms_floor_min: f32,
    #[serde(default = "default_peak_floor_min")]
    pub peak_floor_min: f32,
    #[serde(default = "default_partial_min_ms")]
    pub partial_min_ms: u64,
    #[serde(default = "default_partial_interval_ms")]
    pub partial_interval_ms: u64,
    #[serde(default = "default_late_final_watchdog_ms")]
    pub late_final_watchdog_ms: u64,
    #[serde(default = "default_no_frame_finalize_ms")]
    pub no_frame_finalize_ms: u64,
    #[serde(default = "default_dead_air_ms")]
    pub dead_air_ms: u64,
    /// Reprompts issued before a dead-air call is hung up (spec §4.6).
    #[serde(default = "default_max_reprompts")]
    pub max_reprompts: u32,
    #[serde(default = "default_post_playback_grace_min_ms")]
    pub post_playback_grace_min_ms: u64,
    #[serde(default = "default_post_playback_grace_max_ms")]
    pub post_playback_grace_max_ms: u64,
    #[serde(default = "default_highpass_cutoff_hz")]
    pub highpass_cutoff_hz: f32,
    #[serde(default)]
    pub gating_enabled: bool,
    #[serde(default = "default_stream_restart_max")]
    pub stream_restart_max: u32,
    /// Optional acoustic echo cancellation (spec §4.2); off by default.
    #[serde(default)]
    pub aec_enabled: bool,
    #[serde(default = "default_aec_reference_horizon_ms")]
    pub aec_reference_horizon_ms: u64,
}

fn default_pre_roll_ms() -> u64 { 400 }
fn default_frames_required() -> u32 { 3 }
fn default_silence_end_ms() -> u64 { 700 }
fn default_tail_cushion_ms() -> u64 { 200 }
fn default_min_samples() -> u32 { 50 }
fn default_noise_floor_alpha() -> f32 { 0.05 }
fn default_rms_multiplier() -> f32 { 3.0 }
fn default_peak_multiplier() -> f32 { 2.5 }
fn default_rms_floor_min() -> f32 { 0.01 }
fn default_peak_floor_min() -> f32 { 0.02 }
fn default_partial_min_ms() -> u64 { 300 }
fn default_partial_interval_ms() -> u64 { 500 }
fn default_late_final_watchdog_ms() -> u64 { 15_000 }
fn default_no_frame_finalize_ms() -> u64 { 1_500 }
fn default_dead_air_ms() -> u64 { 8_000 }
fn default_max_reprompts() -> u32 { 2 }
fn default_post_playback_grace_min_ms() -> u64 { 150 }
fn default_post_playback_grace_max_ms() -> u64 { 600 }
fn default_highpass_cutoff_hz() -> f32 { 100.0 }
fn default_stream_restart_max() -> u32 { 3 }
fn default_aec_reference_horizon_ms() -> u64 { 2_000 }

impl Default for EndpointerConfig {
    fn default() -> Self {
        Self {
            pre_roll_ms: default_pre_roll_ms(),
            frames_required: default_frames_required(),
            silence_end_ms: default_silence_end_ms(),
            tail_cushion_ms: default_tail_cushion_ms(),
            min_samples: default_min_samples(),
            noise_floor_alpha: default_noise_floor_alpha(),
            rms_multiplier: default_rms_multiplier(),
            peak_multiplier: default_peak_multiplier(),
            rms_floor_min: default_rms_floor_min(),
            peak_floor_min: default_peak_floor_min(),
            partial_min_ms: default_partial_min_ms(),
            partial_interval_ms: default_partial_interval_ms(),
            late_final_watchdog_ms: default_late_final_watchdog_ms(),
            no_frame_finalize_ms: default_no_frame_finalize_ms(),
            dead_air_ms: default_dead_air_ms(),
            max_reprompts: default_max_reprompts(),
            post_playback_grace_min_ms: default_post_playback_grace_min_ms(),
            post_playback_grace_max_ms: default_post_playback_grace_max_ms(),
            highpass_cutoff_hz: default_highpass_cutoff_hz(),
            gating_enabled: true,
            stream_restart_max: default_stream_restart_max(),
            aec_enabled: false,
            aec_reference_horizon_ms: default_aec_reference_horizon_ms(),
        }
    }
}

impl EndpointerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.post_playback_grace_min_ms > self.post_playback_grace_max_ms {
            return Err(ConfigError::InvalidValue {
                field: "endpointer.post_playback_grace_min_ms".into(),
                message: "must be <= post_playback_grace_max_ms".into(),
            });
        }
        if self.frames_required == 0 {
            return Err(ConfigError::InvalidValue {
                field: "endpointer.frames_required".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Load settings from the environment. Flat variable names (no
/// `VOICE_AGENT__` nesting) since every name in §6 is a top-level
/// identifier like `PORT` or `REDIS_URL`; `config`'s `Environment`
/// source still performs type coercion and exposes the same validation
/// hook as the rest of the workspace.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let raw = Config::builder().add_source(Environment::default()).build()?;
    let settings = build_from_env(raw)?;
    settings.validate()?;
    Ok(settings)
}

/// `config::Environment` alone cannot map flat, non-prefixed variable
/// names (`PORT`, `WHISPER_URL`, `REDIS_URL`) onto nested struct paths
/// without ambiguity, so fields are read individually from
/// `std::env` and merged onto the parsed defaults.
fn build_from_env(raw: Config) -> Result<Settings, ConfigError> {
    let mut settings: Settings = raw.try_deserialize().unwrap_or_default();

    if let Ok(v) = std::env::var("PORT") {
        settings.server.port = v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { field: "PORT".into(), message: v })?;
    }
    if let Ok(v) = std::env::var("MEDIA_STREAM_TOKEN") {
        settings.server.media_stream_token = v;
    }
    if let Ok(v) = std::env::var("TELNYX_SIGNATURE_SKEW_SECONDS") {
        settings.telnyx.signature_skew_seconds = v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { field: "TELNYX_SIGNATURE_SKEW_SECONDS".into(), message: v })?;
    }
    if let Ok(v) = std::env::var("TELNYX_PREFERRED_CODEC") {
        settings.telnyx.preferred_codec = v;
    }
    if let Ok(v) = std::env::var("TELNYX_CALL_CONTROL_BASE_URL") {
        settings.telnyx.call_control_base_url = v;
    }
    if let Ok(v) = std::env::var("TELNYX_CALL_CONTROL_API_KEY") {
        settings.telnyx.call_control_api_key = Some(v);
    }
    if let Ok(v) = std::env::var("REDIS_URL") {
        settings.redis.url = v;
    }
    if let Ok(v) = std::env::var("WHISPER_URL") {
        settings.stt.whisper_url = v;
    }
    if let Ok(v) = std::env::var("STT_TIMEOUT_MS") {
        settings.stt.timeout_ms = v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { field: "STT_TIMEOUT_MS".into(), message: v })?;
    }
    if let Ok(v) = std::env::var("KOKORO_URL") {
        settings.tts.kokoro_url = v;
    }
    if let Ok(v) = std::env::var("COQUI_XTTS_URL") {
        settings.tts.coqui_xtts_url = Some(v);
    }
    if let Ok(v) = std::env::var("TTS_TIMEOUT_MS") {
        settings.tts.timeout_ms = v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { field: "TTS_TIMEOUT_MS".into(), message: v })?;
    }
    if let Ok(v) = std::env::var("BRAIN_URL") {
        settings.brain.url = v;
    }
    if let Ok(v) = std::env::var("BRAIN_NON_STREAMING_TIMEOUT_MS") {
        settings.brain.non_streaming_timeout_ms = v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { field: "BRAIN_NON_STREAMING_TIMEOUT_MS".into(), message: v })?;
    }
    if let Ok(v) = std::env::var("GLOBAL_CONCURRENCY_CAP") {
        settings.capacity.global_concurrency_cap = v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { field: "GLOBAL_CONCURRENCY_CAP".into(), message: v })?;
    }
    if let Ok(v) = std::env::var("CAPACITY_TTL_SECONDS") {
        settings.capacity.capacity_ttl_seconds = v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { field: "CAPACITY_TTL_SECONDS".into(), message: v })?;
    }
    if let Ok(v) = std::env::var("AUDIO_STORAGE_DIR") {
        settings.audio.storage_dir = v;
    }
    if let Ok(v) = std::env::var("AUDIO_PUBLIC_BASE_URL") {
        settings.audio.public_base_url = Some(v);
    }
    if let Ok(v) = std::env::var("CONTROL_PLANE_URL") {
        settings.control_plane.url = v;
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.stt.max_retries, 1);
    }

    #[test]
    fn capacity_rejects_zero_cap() {
        let mut settings = Settings::default();
        settings.capacity.global_concurrency_cap = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn capacity_allows_unlimited_sentinel() {
        let mut settings = Settings::default();
        settings.capacity.global_concurrency_cap = -1;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn endpointer_rejects_inverted_grace_bounds() {
        let mut settings = Settings::default();
        settings.endpointer.post_playback_grace_min_ms = 1000;
        settings.endpointer.post_playback_grace_max_ms = 100;
        assert!(settings.validate().is_err());
    }
}
