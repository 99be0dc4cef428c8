//! Tenant configuration domain types
//!
//! Immutable per version, loaded from the KV store by
//! `voice_agent_config::resolver`. This module owns the shape and the
//! v1-schema validation; the resolver owns caching, lookup, and secret
//! resolution.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TenantError;

pub const CONTRACT_VERSION: &str = "v1";

static E164: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("valid regex"));

/// Normalize a dialed/destination number: strip whitespace, then validate
/// against E.164. Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize_e164(raw: &str) -> Result<String, TenantError> {
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if !E164.is_match(&stripped) {
        return Err(TenantError::InvalidField {
            field: "number".into(),
            message: format!("{stripped} is not a valid E.164 number"),
        });
    }
    Ok(stripped)
}

/// A webhook secret, either given literally or as an `env:NAME` reference.
///
/// The wire format is a single string field: `env:NAME` parses as a
/// reference, anything else is taken literally. An untagged derive would
/// have matched every string against `Literal` first and never recovered
/// the reference, so (de)serialization is hand-written to round-trip
/// through that one-string wire format instead.
#[derive(Debug, Clone)]
pub enum SecretRef {
    Literal(String),
    EnvRef(String),
}

impl Serialize for SecretRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SecretRef::Literal(s) => serializer.serialize_str(s),
            SecretRef::EnvRef(name) => serializer.serialize_str(&format!("env:{name}")),
        }
    }
}

impl<'de> Deserialize<'de> for SecretRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SecretRef::parse(&raw))
    }
}

impl SecretRef {
    /// Parse the raw config field: `env:NAME` is a reference, anything else
    /// is taken literally.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("env:") {
            Some(name) => SecretRef::EnvRef(name.to_string()),
            None => SecretRef::Literal(raw.to_string()),
        }
    }

    /// Resolve to the actual secret value. A missing/empty environment
    /// variable counts as "no secret" (`None`), per spec §4.1.
    pub fn resolve(&self) -> Option<String> {
        match self {
            SecretRef::Literal(s) if !s.is_empty() => Some(s.clone()),
            SecretRef::Literal(_) => None,
            SecretRef::EnvRef(name) => std::env::var(name).ok().filter(|v| !v.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsBackendKind {
    NarrowbandHttp,
    HdHttp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtsTuning {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub length_penalty: Option<f32>,
    #[serde(default)]
    pub repetition_penalty: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub sentence_split: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    pub endpoint_url: String,
    #[serde(default = "default_chunk_duration_ms")]
    pub chunk_duration_ms: u32,
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u32,
    #[serde(default)]
    pub language_hint: Option<String>,
    #[serde(default)]
    pub decoding_prompt: Option<String>,
}

fn default_chunk_duration_ms() -> u32 {
    20
}
fn default_silence_timeout_ms() -> u32 {
    700
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub backend: TtsBackendKind,
    pub endpoint_url: String,
    pub voice_id: String,
    pub sample_rate_hz: u32,
    #[serde(default)]
    pub tuning: TtsTuning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProfile {
    pub name: String,
    pub holder: String,
    pub responsibilities: String,
    pub destination: String,
    #[serde(default)]
    pub hold_audio_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantContextSection {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub contract_version: String,
    pub tenant_id: String,
    pub dialed_numbers: Vec<String>,
    pub max_concurrent_calls: i64,
    pub max_calls_per_minute: i64,
    pub webhook_secret: SecretRef,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    #[serde(default)]
    pub transfer_profiles: Vec<TransferProfile>,
    #[serde(default)]
    pub assistant_context: Vec<AssistantContextSection>,
}

impl TenantConfig {
    /// Enforce the v1-schema invariants from spec §3: contract version,
    /// strictly-positive caps and timeouts, valid E.164 numbers and
    /// destinations. Unlimited plans (`-1`) bypass the cap invariant.
    pub fn validate(&self) -> Result<(), TenantError> {
        if self.contract_version != CONTRACT_VERSION {
            return Err(TenantError::BadVersion(self.contract_version.clone()));
        }

        if self.dialed_numbers.is_empty() {
            return Err(TenantError::InvalidField {
                field: "dialed_numbers".into(),
                message: "at least one dialed number is required".into(),
            });
        }
        for number in &self.dialed_numbers {
            normalize_e164(number).map_err(|_| TenantError::InvalidField {
                field: "dialed_numbers".into(),
                message: format!("{number} is not a valid E.164 number"),
            })?;
        }

        if self.max_concurrent_calls != -1 && self.max_concurrent_calls <= 0 {
            return Err(TenantError::InvalidField {
                field: "max_concurrent_calls".into(),
                message: "must be strictly positive or -1 for unlimited".into(),
            });
        }
        if self.max_calls_per_minute != -1 && self.max_calls_per_minute <= 0 {
            return Err(TenantError::InvalidField {
                field: "max_calls_per_minute".into(),
                message: "must be strictly positive or -1 for unlimited".into(),
            });
        }

        if self.stt.chunk_duration_ms == 0 || self.stt.silence_timeout_ms == 0 {
            return Err(TenantError::InvalidField {
                field: "stt".into(),
                message: "chunk_duration_ms and silence_timeout_ms must be positive".into(),
            });
        }

        for profile in &self.transfer_profiles {
            normalize_e164(&profile.destination).map_err(|_| TenantError::InvalidField {
                field: "transfer_profiles.destination".into(),
                message: format!("{} is not a valid E.164 destination", profile.destination),
            })?;
        }

        Ok(())
    }

    /// `true` if the tenant has no concurrency/rate enforcement (billing
    /// value `-1`).
    pub fn is_unlimited(&self, max: i64) -> bool {
        max == -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> TenantConfig {
        TenantConfig {
            contract_version: CONTRACT_VERSION.to_string(),
            tenant_id: "t1".into(),
            dialed_numbers: vec!["+15551234567".into()],
            max_concurrent_calls: 10,
            max_calls_per_minute: 5,
            webhook_secret: SecretRef::Literal("secret".into()),
            stt: SttConfig {
                endpoint_url: "http://stt".into(),
                chunk_duration_ms: 20,
                silence_timeout_ms: 700,
                language_hint: None,
                decoding_prompt: None,
            },
            tts: TtsConfig {
                backend: TtsBackendKind::NarrowbandHttp,
                endpoint_url: "http://tts".into(),
                voice_id: "default".into(),
                sample_rate_hz: 8000,
                tuning: TtsTuning::default(),
            },
            transfer_profiles: vec![],
            assistant_context: vec![],
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let n1 = normalize_e164(" +1 5551234567").unwrap();
        let n2 = normalize_e164(&n1).unwrap();
        assert_eq!(n1, n2);
    }

    #[test]
    fn rejects_bad_version() {
        let mut cfg = valid_config();
        cfg.contract_version = "v2".into();
        assert!(matches!(cfg.validate(), Err(TenantError::BadVersion(_))));
    }

    #[test]
    fn rejects_non_positive_caps() {
        let mut cfg = valid_config();
        cfg.max_concurrent_calls = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unlimited_caps_bypass_positivity_check() {
        let mut cfg = valid_config();
        cfg.max_concurrent_calls = -1;
        cfg.max_calls_per_minute = -1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_secret_ref_resolves_from_environment() {
        std::env::set_var("TEST_WEBHOOK_SECRET_XYZ", "hunter2");
        let secret = SecretRef::parse("env:TEST_WEBHOOK_SECRET_XYZ");
        assert_eq!(secret.resolve(), Some("hunter2".to_string()));
        std::env::remove_var("TEST_WEBHOOK_SECRET_XYZ");
    }

    #[test]
    fn missing_env_secret_resolves_to_none() {
        let secret = SecretRef::parse("env:DOES_NOT_EXIST_VAR_XYZ");
        assert_eq!(secret.resolve(), None);
    }
}
