//! TTS microservice client (spec §4.4, §6)
//!
//! `POST {text, voice_id, rate, language, sample_rate, format}` returns
//! audio bytes plus a content-type header. Outgoing text is shaped
//! before it ever reaches the service: trimmed, whitespace-collapsed,
//! given terminal punctuation, and split at commas so no chunk exceeds
//! 140 characters, joined by newlines as a pause hint for the
//! synthesizer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

use voice_agent_core::error::Result as CoreResult;
use voice_agent_core::traits::{TextToSpeech, TtsAudio, TtsRequest};

use crate::retry::with_one_retry;
use crate::ClientError;

const SERVICE: &str = "tts";
const MAX_CHUNK_CHARS: usize = 140;

#[derive(Debug, Clone)]
pub struct TtsClientConfig {
    pub endpoint_url: String,
    pub timeout: Duration,
}

impl Default for TtsClientConfig {
    fn default() -> Self {
        Self { endpoint_url: "http://localhost:8880".to_string(), timeout: Duration::from_secs(10) }
    }
}

pub struct HttpTtsClient {
    http: Client,
    config: TtsClientConfig,
}

impl HttpTtsClient {
    pub fn new(config: TtsClientConfig) -> Self {
        Self { http: Client::new(), config }
    }

    async fn post_once(&self, request: &TtsRequest) -> Result<TtsAudio, ClientError> {
        #[derive(serde::Serialize)]
        struct WireRequest<'a> {
            text: &'a str,
            voice_id: &'a str,
            rate: Option<f32>,
            language: Option<&'a str>,
            sample_rate: u32,
        }

        let shaped = shape_tts_text(&request.text, MAX_CHUNK_CHARS);
        let wire = WireRequest {
            text: &shaped,
            voice_id: &request.voice_id,
            rate: request.rate,
            language: request.language.as_deref(),
            sample_rate: request.sample_rate_hz,
        };

        let response = self
            .http
            .post(&self.config.endpoint_url)
            .timeout(self.config.timeout)
            .json(&wire)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ClientError::Transient { service: SERVICE, message: status.to_string() });
        }
        if !status.is_success() {
            return Err(ClientError::BadResponse { service: SERVICE, message: format!("status {status}") });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = response.bytes().await.map_err(|e| ClientError::BadResponse { service: SERVICE, message: e.to_string() })?;

        Ok(TtsAudio { bytes: bytes.to_vec(), content_type })
    }
}

fn classify_transport_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout { service: SERVICE, elapsed: Duration::from_secs(0) }
    } else if err.is_connect() || err.is_request() {
        ClientError::Transient { service: SERVICE, message: err.to_string() }
    } else {
        ClientError::BadResponse { service: SERVICE, message: err.to_string() }
    }
}

#[async_trait]
impl TextToSpeech for HttpTtsClient {
    async fn synthesize(&self, request: &TtsRequest) -> CoreResult<TtsAudio> {
        let deadline = Instant::now() + self.config.timeout;
        with_one_retry(deadline, || self.post_once(request))
            .await
            .map_err(|e| voice_agent_core::error::Error::Validation(e.to_string()))
    }

    fn name(&self) -> &str {
        "http-tts"
    }
}

/// Shape assistant text for synthesis (spec §4.4):
/// 1. trim and collapse internal whitespace
/// 2. ensure terminal punctuation
/// 3. split at comma boundaries so no chunk exceeds `max_chars`
/// 4. join the chunks with `\n`, a pause hint for the synthesizer
pub fn shape_tts_text(text: &str, max_chars: usize) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let punctuated = if trimmed.ends_with(['.', '!', '?']) {
        trimmed.to_string()
    } else {
        format!("{trimmed}.")
    };

    let chunks = split_long_sentence(&punctuated, max_chars);
    chunks.join("\n")
}

fn split_long_sentence(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.chars().count() <= max_chars {
        return vec![sentence.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for part in sentence.split_inclusive(',') {
        if !current.is_empty() && current.chars().count() + part.chars().count() > max_chars {
            chunks.push(current.trim().to_string());
            current.clear();
        }
        current.push_str(part);
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_adds_terminal_punctuation() {
        let shaped = shape_tts_text("  hello   there  ", 140);
        assert_eq!(shaped, "hello there.");
    }

    #[test]
    fn leaves_existing_terminal_punctuation_alone() {
        let shaped = shape_tts_text("are you there?", 140);
        assert_eq!(shaped, "are you there?");
    }

    #[test]
    fn splits_long_sentence_at_commas_under_limit() {
        let long = "we offer checking, savings, business loans, mortgages, and retirement products";
        let shaped = shape_tts_text(long, 30);
        assert!(shaped.lines().count() > 1);
        // every chunk boundary falls at a comma, never mid-clause
        for line in shaped.lines() {
            assert!(!line.trim().is_empty());
        }
    }

    #[test]
    fn empty_text_shapes_to_empty() {
        assert_eq!(shape_tts_text("   ", 140), "");
    }
}
